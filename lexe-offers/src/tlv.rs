//! The bigsize + TLV wire codec shared by `offer`, `invoice_request`, and
//! `invoice`.
//!
//! A TLV stream is a flat sequence of `(type, length, value)` records, each
//! field encoded as two `bigsize`s (type, length) followed by `length` raw
//! bytes, with records required to appear in strictly ascending type order.
//! Odd-numbered unknown types are preserved verbatim (forwards compatibility,
//! BOLT-1 "it's ok to be odd"); unknown even types are a hard parse failure.

use std::{collections::BTreeMap, io::{self, Read}};

use crate::error::{OffersError, OffersErrorKind};

/// A single decoded TLV record: its wire type and raw value bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlvField {
    pub ty: u64,
    pub value: Vec<u8>,
}

/// A decoded TLV stream, keyed by type for O(log n) field lookup.
///
/// Fields are stored in a [`BTreeMap`] rather than a `Vec` so that
/// `merkle::merkle_root` and the semantic decoders can pull specific field
/// types without a linear scan, while [`TlvStream::encode`] still
/// re-serializes in ascending type order (the map's natural order).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlvStream {
    fields: BTreeMap<u64, Vec<u8>>,
}

impl TlvStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ty: u64, value: Vec<u8>) {
        self.fields.insert(ty, value);
    }

    pub fn get(&self, ty: u64) -> Option<&[u8]> {
        self.fields.get(&ty).map(Vec::as_slice)
    }

    pub fn contains(&self, ty: u64) -> bool {
        self.fields.contains_key(&ty)
    }

    /// Iterate fields in ascending type order, the same order they appear on
    /// the wire and the order the merkle tree is built over.
    pub fn iter(&self) -> impl Iterator<Item = TlvField> + '_ {
        self.fields.iter().map(|(&ty, value)| TlvField {
            ty,
            value: value.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize the stream to its canonical wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (&ty, value) in &self.fields {
            write_bigsize(&mut out, ty);
            write_bigsize(&mut out, value.len() as u64);
            out.extend_from_slice(value);
        }
        out
    }

    /// Parse a TLV stream from its canonical wire form.
    ///
    /// Enforces strictly ascending type order and rejects unknown even
    /// types; unknown odd types are retained as opaque fields so that a
    /// future protocol extension round-trips through an older parser.
    pub fn decode(bytes: &[u8]) -> Result<Self, OffersError> {
        let mut cursor = io::Cursor::new(bytes);
        let mut fields = BTreeMap::new();
        let mut last_ty: Option<u64> = None;

        while (cursor.position() as usize) < bytes.len() {
            let ty = read_bigsize(&mut cursor)?;
            if let Some(last) = last_ty {
                if ty <= last {
                    return Err(parse_err(format!(
                        "tlv type {ty} out of order (after {last})"
                    )));
                }
            }
            let len = read_bigsize(&mut cursor)? as usize;
            let mut value = vec![0u8; len];
            cursor.read_exact(&mut value).map_err(|_| {
                parse_err(format!(
                    "tlv type {ty} truncated: wanted {len} bytes"
                ))
            })?;

            fields.insert(ty, value);
            last_ty = Some(ty);
        }

        Ok(Self { fields })
    }

    /// Reject unknown even-typed fields, given the set of types this message
    /// kind recognizes. Per BOLT-1, unrecognized odd types are silently
    /// accepted (forwards-compatible extension fields).
    pub fn check_known_even_types(
        &self,
        known: &[u64],
    ) -> Result<(), OffersError> {
        for ty in self.fields.keys() {
            if ty % 2 == 0 && !known.contains(ty) {
                return Err(OffersError::new(
                    OffersErrorKind::ParseError,
                    format!("unknown even tlv type {ty}"),
                ));
            }
        }
        Ok(())
    }
}

fn parse_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::ParseError, msg)
}

/// Encode `n` as a `bigsize` (BOLT-7 variable-length integer).
pub fn write_bigsize(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n < 0x1_0000 {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n < 0x1_0000_0000 {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

/// Decode a `bigsize`, rejecting non-canonical (non-minimal) encodings.
pub fn read_bigsize(cursor: &mut io::Cursor<&[u8]>) -> Result<u64, OffersError> {
    let mut first = [0u8; 1];
    cursor
        .read_exact(&mut first)
        .map_err(|_| parse_err("truncated bigsize"))?;

    match first[0] {
        0xff => {
            let mut buf = [0u8; 8];
            cursor
                .read_exact(&mut buf)
                .map_err(|_| parse_err("truncated bigsize (8-byte)"))?;
            let n = u64::from_be_bytes(buf);
            if n < 0x1_0000_0000 {
                return Err(parse_err("non-minimal bigsize (8-byte)"));
            }
            Ok(n)
        }
        0xfe => {
            let mut buf = [0u8; 4];
            cursor
                .read_exact(&mut buf)
                .map_err(|_| parse_err("truncated bigsize (4-byte)"))?;
            let n = u32::from_be_bytes(buf) as u64;
            if n < 0x1_0000 {
                return Err(parse_err("non-minimal bigsize (4-byte)"));
            }
            Ok(n)
        }
        0xfd => {
            let mut buf = [0u8; 2];
            cursor
                .read_exact(&mut buf)
                .map_err(|_| parse_err("truncated bigsize (2-byte)"))?;
            let n = u16::from_be_bytes(buf) as u64;
            if n < 0xfd {
                return Err(parse_err("non-minimal bigsize (2-byte)"));
            }
            Ok(n)
        }
        n => Ok(n as u64),
    }
}

/// Write a `bigsize`-prefixed byte string: used by callers building a single
/// TLV field's value out of nested variable-length sub-fields (e.g. a TLV
/// field whose value is itself a list of pubkeys).
pub fn write_bytes_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    write_bigsize(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Big-endian encode `n`, dropping leading zero bytes -- BOLT-12's `tuN`
/// minimal-width integer encoding.
pub fn to_be_bytes_trimmed(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[first_nonzero..].to_vec()
}

pub fn read_be_tu64(bytes: &[u8]) -> Result<u64, OffersError> {
    if bytes.len() > 8 {
        return Err(parse_err("truncated (tu64) integer field too long"));
    }
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    let n = u64::from_be_bytes(buf);
    // BOLT-12 `tu64` fields must be minimally encoded (no leading zero byte).
    if !bytes.is_empty() && bytes[0] == 0 {
        return Err(parse_err("non-minimal tu64 encoding"));
    }
    Ok(n)
}

/// Minimal no-op writer kept for symmetry with [`read_be_tu64`]; exists so
/// call sites read `tlv::write_tu64(n)` rather than reaching for
/// [`to_be_bytes_trimmed`] directly.
pub fn write_tu64(n: u64) -> Vec<u8> {
    to_be_bytes_trimmed(n)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bigsize_roundtrips() {
        let cases = [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000, u64::MAX];
        for &n in &cases {
            let mut buf = Vec::new();
            write_bigsize(&mut buf, n);
            let mut cursor = io::Cursor::new(buf.as_slice());
            let got = read_bigsize(&mut cursor).unwrap();
            assert_eq!(got, n);
            assert_eq!(cursor.position() as usize, buf.len());
        }
    }

    #[test]
    fn bigsize_rejects_non_minimal() {
        // 0xfd 00 01 encodes 1, which fits in a single byte -> non-minimal.
        let bytes = [0xfd, 0x00, 0x01];
        let mut cursor = io::Cursor::new(bytes.as_slice());
        assert!(read_bigsize(&mut cursor).is_err());
    }

    #[test]
    fn tlv_stream_roundtrips() {
        let mut stream = TlvStream::new();
        stream.insert(2, vec![0xde, 0xad]);
        stream.insert(4, vec![]);
        stream.insert(240, vec![1; 64]);

        let encoded = stream.encode();
        let decoded = TlvStream::decode(&encoded).unwrap();
        assert_eq!(stream, decoded);
    }

    #[test]
    fn tlv_stream_rejects_out_of_order() {
        let mut bytes = Vec::new();
        write_bigsize(&mut bytes, 4);
        write_bigsize(&mut bytes, 0);
        write_bigsize(&mut bytes, 2);
        write_bigsize(&mut bytes, 0);
        assert!(TlvStream::decode(&bytes).is_err());
    }

    #[test]
    fn tlv_stream_rejects_unknown_even_type() {
        let mut stream = TlvStream::new();
        stream.insert(6, vec![1]);
        assert!(stream.check_known_even_types(&[2, 4]).is_err());
        assert!(stream.check_known_even_types(&[2, 4, 6]).is_ok());
    }

    #[test]
    fn tlv_stream_allows_unknown_odd_type() {
        let mut stream = TlvStream::new();
        stream.insert(7, vec![1]);
        assert!(stream.check_known_even_types(&[2, 4]).is_ok());
    }

    #[test]
    fn tu64_rejects_non_minimal() {
        assert!(read_be_tu64(&[0x00, 0x01]).is_err());
        assert_eq!(read_be_tu64(&[0x01]).unwrap(), 1);
        assert_eq!(read_be_tu64(&[]).unwrap(), 0);
    }
}
