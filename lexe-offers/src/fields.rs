//! Shared field-shape (de)serializers used by [`crate::offer`],
//! [`crate::invoice_request`], and [`crate::invoice`] to turn [`TlvStream`]
//! byte values into the semantic Rust types the rest of the engine works
//! with.
//!
//! Every BOLT-12 message is a flat TLV stream, but the *payload* of a given
//! field type always has one of a handful of shapes (a truncated big-endian
//! integer, a raw 32-byte hash, a UTF-8 string, a list of fixed-size
//! records, ...). Centralizing those shapes here keeps `offer.rs` /
//! `invoice_request.rs` / `invoice.rs` down to "which fields does this
//! message have" rather than re-deriving bigsize/utf8/pubkey parsing three
//! times over.

use bitcoin::secp256k1::XOnlyPublicKey;

use crate::{
    error::{OffersError, OffersErrorKind},
    tlv::{read_be_tu64, write_tu64},
};

fn parse_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::ParseError, msg)
}

/// Decode a BOLT-12 `tu64` (truncated, minimally-encoded big-endian u64).
pub fn decode_tu64(value: &[u8]) -> Result<u64, OffersError> {
    read_be_tu64(value)
}

/// Encode a `tu64`.
pub fn encode_tu64(n: u64) -> Vec<u8> {
    write_tu64(n)
}

/// Decode a `tu32`, rejecting values that don't fit.
pub fn decode_tu32(value: &[u8]) -> Result<u32, OffersError> {
    let n = decode_tu64(value)?;
    u32::try_from(n).map_err(|_| parse_err("tu32 field overflows u32"))
}

pub fn encode_tu32(n: u32) -> Vec<u8> {
    encode_tu64(n as u64)
}

/// Decode a UTF-8 string field (BOLT-12 places no implicit length limit
/// beyond the record's own `length`).
pub fn decode_utf8(field: &'static str, value: &[u8]) -> Result<String, OffersError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| parse_err(format!("field `{field}` is not valid utf-8")))
}

/// Decode a 32-byte X-only pubkey field.
pub fn decode_xonly_pubkey(
    field: &'static str,
    value: &[u8],
) -> Result<XOnlyPublicKey, OffersError> {
    XOnlyPublicKey::from_slice(value).map_err(|e| {
        parse_err(format!("field `{field}` is not a valid x-only pubkey: {e}"))
    })
}

pub fn encode_xonly_pubkey(pk: &XOnlyPublicKey) -> Vec<u8> {
    pk.serialize().to_vec()
}

/// Decode a single fixed 32-byte field (e.g. `offer_id`, `payment_hash`).
pub fn decode_hash32(
    field: &'static str,
    value: &[u8],
) -> Result<[u8; 32], OffersError> {
    value
        .try_into()
        .map_err(|_| parse_err(format!("field `{field}` is not 32 bytes")))
}

pub fn encode_hash32(hash: &[u8; 32]) -> Vec<u8> {
    hash.to_vec()
}

/// Decode a list of fixed-size 32-byte chunks (e.g. a chain-hash list).
pub fn decode_chunks32(
    field: &'static str,
    value: &[u8],
) -> Result<Vec<[u8; 32]>, OffersError> {
    if value.len() % 32 != 0 {
        return Err(parse_err(format!(
            "field `{field}` length {} is not a multiple of 32",
            value.len()
        )));
    }
    Ok(value.chunks_exact(32).map(|c| c.try_into().unwrap()).collect())
}

pub fn encode_chunks32(chunks: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.len() * 32);
    for c in chunks {
        out.extend_from_slice(c);
    }
    out
}

/// The recurrence period unit, BOLT-12 `recurrence_time_unit`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecurrencePeriodKind {
    Seconds,
    Days,
    Months,
    Years,
}

impl RecurrencePeriodKind {
    fn to_byte(self) -> u8 {
        match self {
            Self::Seconds => 0,
            Self::Days => 1,
            Self::Months => 2,
            Self::Years => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self, OffersError> {
        match b {
            0 => Ok(Self::Seconds),
            1 => Ok(Self::Days),
            2 => Ok(Self::Months),
            3 => Ok(Self::Years),
            _ => Err(parse_err(format!("unknown recurrence time unit {b}"))),
        }
    }
}

/// `offer_recurrence`: `{period_kind, period_count}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Recurrence {
    pub period_kind: RecurrencePeriodKind,
    pub period_count: u32,
}

pub fn decode_recurrence(value: &[u8]) -> Result<Recurrence, OffersError> {
    if value.len() < 5 {
        return Err(parse_err("offer_recurrence truncated"));
    }
    let period_kind = RecurrencePeriodKind::from_byte(value[0])?;
    let period_count = u32::from_be_bytes(value[1..5].try_into().unwrap());
    Ok(Recurrence {
        period_kind,
        period_count,
    })
}

pub fn encode_recurrence(r: &Recurrence) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(r.period_kind.to_byte());
    out.extend_from_slice(&r.period_count.to_be_bytes());
    out
}

/// `offer_recurrence_base`: `{start_any_period, basetime}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecurrenceBase {
    pub start_any_period: u8,
    pub basetime: u64,
}

pub fn decode_recurrence_base(
    value: &[u8],
) -> Result<RecurrenceBase, OffersError> {
    if value.is_empty() {
        return Err(parse_err("offer_recurrence_base truncated"));
    }
    let start_any_period = value[0];
    let basetime = decode_tu64(&value[1..])?;
    Ok(RecurrenceBase {
        start_any_period,
        basetime,
    })
}

pub fn encode_recurrence_base(r: &RecurrenceBase) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8);
    out.push(r.start_any_period);
    out.extend_from_slice(&encode_tu64(r.basetime));
    out
}

/// `offer_recurrence_paywindow`: `{before, after, proportional_amount}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecurrencePaywindow {
    pub before: u32,
    pub after: u32,
    pub proportional_amount: u8,
}

pub fn decode_recurrence_paywindow(
    value: &[u8],
) -> Result<RecurrencePaywindow, OffersError> {
    if value.len() != 9 {
        return Err(parse_err("offer_recurrence_paywindow malformed"));
    }
    Ok(RecurrencePaywindow {
        before: u32::from_be_bytes(value[0..4].try_into().unwrap()),
        after: u32::from_be_bytes(value[4..8].try_into().unwrap()),
        proportional_amount: value[8],
    })
}

pub fn encode_recurrence_paywindow(p: &RecurrencePaywindow) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&p.before.to_be_bytes());
    out.extend_from_slice(&p.after.to_be_bytes());
    out.push(p.proportional_amount);
    out
}
