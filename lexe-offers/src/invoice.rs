//! The BOLT-12 `invoice` message: the merchant's reply to an
//! `invoice_request`, carrying the final payable claim.
//!
//! Like [`crate::invoice_request`], this module is purely the wire codec;
//! cross-checking a decoded invoice against the offer/invoice_request that
//! prompted it is [`crate::engine`]'s job (C7), since that's an *exchange*
//! concern, not a codec concern.

use bitcoin::secp256k1::{self, schnorr, XOnlyPublicKey};

use crate::{
    blinded_path::{self, BlindedPath},
    error::{OffersError, OffersErrorKind},
    fields, merkle, signature,
    tlv::{read_bigsize, write_bigsize, TlvStream},
    wire,
};

const INVOICE_FALLBACK: u64 = wire::INVOICE_FALLBACKS;
const INVOICE_PATHS: u64 = wire::INVOICE_BLINDED_PATHS;

const KNOWN_EVEN_TYPES: &[u64] = &[
    wire::INVREQ_OFFER_ID,
    wire::INVREQ_QUANTITY,
    wire::INVREQ_RECURRENCE_COUNTER,
    wire::INVREQ_RECURRENCE_START,
    wire::INVREQ_PAYER_KEY,
    wire::INVREQ_PAYER_INFO,
    wire::OFFER_NODE_ID,
    wire::OFFER_DESCRIPTION,
    wire::OFFER_VENDOR,
    wire::INVOICE_AMOUNT,
    wire::INVOICE_CREATED_AT,
    wire::INVOICE_RELATIVE_EXPIRY,
    wire::INVOICE_PAYMENT_HASH,
    wire::INVOICE_MIN_FINAL_CLTV_EXPIRY,
    INVOICE_FALLBACK,
    INVOICE_PATHS,
    wire::INVOICE_RECURRENCE_BASETIME,
];

/// A single on-chain fallback address: a witness/script version byte plus
/// the raw address payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fallback {
    pub version: u8,
    pub address: Vec<u8>,
}

fn encode_fallbacks(fallbacks: &[Fallback]) -> Vec<u8> {
    let mut out = Vec::new();
    for f in fallbacks {
        out.push(f.version);
        write_bigsize(&mut out, f.address.len() as u64);
        out.extend_from_slice(&f.address);
    }
    out
}

fn decode_fallbacks(value: &[u8]) -> Result<Vec<Fallback>, OffersError> {
    use std::io::Read;
    let mut cursor = std::io::Cursor::new(value);
    let mut out = Vec::new();
    while (cursor.position() as usize) < value.len() {
        let mut version = [0u8; 1];
        cursor.read_exact(&mut version).map_err(|_| {
            OffersError::new(
                OffersErrorKind::ParseError,
                "truncated fallback version",
            )
        })?;
        let len = read_bigsize(&mut cursor)?;
        let mut address = vec![0u8; len as usize];
        cursor.read_exact(&mut address).map_err(|_| {
            OffersError::new(
                OffersErrorKind::ParseError,
                "truncated fallback address",
            )
        })?;
        out.push(Fallback {
            version: version[0],
            address,
        });
    }
    Ok(out)
}

/// A BOLT-12 invoice: the merchant's reply carrying the final payable claim.
#[derive(Clone, Debug, PartialEq)]
pub struct Invoice {
    // --- echoed from the invoice_request --- //
    pub offer_id: [u8; 32],
    pub payer_key: XOnlyPublicKey,
    pub payer_info: Vec<u8>,
    pub quantity: Option<u64>,
    pub recurrence_counter: Option<u32>,
    pub recurrence_start: Option<u32>,

    // --- merchant-supplied --- //
    pub node_id: XOnlyPublicKey,
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub amount_msat: u64,
    pub created_at: u64,
    pub relative_expiry: Option<u32>,
    pub payment_hash: [u8; 32],
    pub min_final_cltv_expiry: Option<u32>,
    pub fallbacks: Vec<Fallback>,
    pub blinded_paths: Vec<BlindedPath>,
    /// Required iff `recurrence_counter` is set.
    pub recurrence_basetime: Option<u64>,
    pub signature: Option<schnorr::Signature>,
}

impl Invoice {
    pub fn to_tlv(&self) -> TlvStream {
        let mut s = TlvStream::new();
        s.insert(wire::INVREQ_OFFER_ID, fields::encode_hash32(&self.offer_id));
        s.insert(
            wire::INVREQ_PAYER_KEY,
            fields::encode_xonly_pubkey(&self.payer_key),
        );
        s.insert(wire::INVREQ_PAYER_INFO, self.payer_info.clone());
        if let Some(quantity) = self.quantity {
            s.insert(wire::INVREQ_QUANTITY, fields::encode_tu64(quantity));
        }
        if let Some(counter) = self.recurrence_counter {
            s.insert(
                wire::INVREQ_RECURRENCE_COUNTER,
                fields::encode_tu32(counter),
            );
        }
        if let Some(start) = self.recurrence_start {
            s.insert(
                wire::INVREQ_RECURRENCE_START,
                fields::encode_tu32(start),
            );
        }
        s.insert(wire::OFFER_NODE_ID, fields::encode_xonly_pubkey(&self.node_id));
        if let Some(description) = &self.description {
            s.insert(wire::OFFER_DESCRIPTION, description.as_bytes().to_vec());
        }
        if let Some(vendor) = &self.vendor {
            s.insert(wire::OFFER_VENDOR, vendor.as_bytes().to_vec());
        }
        s.insert(wire::INVOICE_AMOUNT, fields::encode_tu64(self.amount_msat));
        s.insert(wire::INVOICE_CREATED_AT, fields::encode_tu64(self.created_at));
        if let Some(expiry) = self.relative_expiry {
            s.insert(
                wire::INVOICE_RELATIVE_EXPIRY,
                fields::encode_tu32(expiry),
            );
        }
        s.insert(
            wire::INVOICE_PAYMENT_HASH,
            fields::encode_hash32(&self.payment_hash),
        );
        if let Some(cltv) = self.min_final_cltv_expiry {
            s.insert(
                wire::INVOICE_MIN_FINAL_CLTV_EXPIRY,
                fields::encode_tu32(cltv),
            );
        }
        if !self.fallbacks.is_empty() {
            s.insert(INVOICE_FALLBACK, encode_fallbacks(&self.fallbacks));
        }
        if !self.blinded_paths.is_empty() {
            s.insert(
                INVOICE_PATHS,
                blinded_path::encode_paths(&self.blinded_paths),
            );
        }
        if let Some(basetime) = self.recurrence_basetime {
            s.insert(
                wire::INVOICE_RECURRENCE_BASETIME,
                fields::encode_tu64(basetime),
            );
        }
        if let Some(sig) = &self.signature {
            s.insert(wire::SIG_SIGNATURE, sig.as_ref().to_vec());
        }
        s
    }

    pub fn from_tlv(stream: &TlvStream) -> Result<Self, OffersError> {
        stream.check_known_even_types(KNOWN_EVEN_TYPES)?;

        let require = |ty: u64, name: &'static str| {
            stream.get(ty).ok_or_else(|| {
                OffersError::new(
                    OffersErrorKind::ParseError,
                    format!("invoice missing required field `{name}`"),
                )
            })
        };

        let offer_id = fields::decode_hash32(
            "offer_id",
            require(wire::INVREQ_OFFER_ID, "offer_id")?,
        )?;
        let payer_key = fields::decode_xonly_pubkey(
            "payer_id",
            require(wire::INVREQ_PAYER_KEY, "payer_key")?,
        )?;
        let payer_info = require(wire::INVREQ_PAYER_INFO, "payer_info")?.to_vec();
        let quantity = stream
            .get(wire::INVREQ_QUANTITY)
            .map(fields::decode_tu64)
            .transpose()?;
        let recurrence_counter = stream
            .get(wire::INVREQ_RECURRENCE_COUNTER)
            .map(fields::decode_tu32)
            .transpose()?;
        let recurrence_start = stream
            .get(wire::INVREQ_RECURRENCE_START)
            .map(fields::decode_tu32)
            .transpose()?;
        let node_id = fields::decode_xonly_pubkey(
            "node_id",
            require(wire::OFFER_NODE_ID, "node_id")?,
        )?;
        let description = stream
            .get(wire::OFFER_DESCRIPTION)
            .map(|v| fields::decode_utf8("description", v))
            .transpose()?;
        let vendor = stream
            .get(wire::OFFER_VENDOR)
            .map(|v| fields::decode_utf8("vendor", v))
            .transpose()?;
        let amount_msat =
            fields::decode_tu64(require(wire::INVOICE_AMOUNT, "amount")?)?;
        let created_at =
            fields::decode_tu64(require(wire::INVOICE_CREATED_AT, "created_at")?)?;
        let relative_expiry = stream
            .get(wire::INVOICE_RELATIVE_EXPIRY)
            .map(fields::decode_tu32)
            .transpose()?;
        let payment_hash = fields::decode_hash32(
            "payment_hash",
            require(wire::INVOICE_PAYMENT_HASH, "payment_hash")?,
        )?;
        let min_final_cltv_expiry = stream
            .get(wire::INVOICE_MIN_FINAL_CLTV_EXPIRY)
            .map(fields::decode_tu32)
            .transpose()?;
        let fallbacks = stream
            .get(INVOICE_FALLBACK)
            .map(decode_fallbacks)
            .transpose()?
            .unwrap_or_default();
        let blinded_paths = stream
            .get(INVOICE_PATHS)
            .map(blinded_path::decode_paths)
            .transpose()?
            .unwrap_or_default();
        let recurrence_basetime = stream
            .get(wire::INVOICE_RECURRENCE_BASETIME)
            .map(fields::decode_tu64)
            .transpose()?;
        let signature = stream
            .get(wire::SIG_SIGNATURE)
            .map(|v| {
                schnorr::Signature::from_slice(v).map_err(|e| {
                    OffersError::new(
                        OffersErrorKind::ParseError,
                        format!("malformed signature: {e}"),
                    )
                })
            })
            .transpose()?;

        if recurrence_counter.is_some() && recurrence_basetime.is_none() {
            return Err(OffersError::new(
                OffersErrorKind::ParseError,
                "invoice has recurrence_counter but no recurrence_basetime",
            ));
        }

        Ok(Self {
            offer_id,
            payer_key,
            payer_info,
            quantity,
            recurrence_counter,
            recurrence_start,
            node_id,
            description,
            vendor,
            amount_msat,
            created_at,
            relative_expiry,
            payment_hash,
            min_final_cltv_expiry,
            fallbacks,
            blinded_paths,
            recurrence_basetime,
            signature,
        })
    }

    pub fn merkle_root(&self) -> Result<[u8; 32], OffersError> {
        merkle::merkle_root(&self.to_tlv()).ok_or_else(|| {
            OffersError::new(
                OffersErrorKind::SemanticError,
                "invoice has no fields to hash",
            )
        })
    }

    /// Verify `self.signature` against `self.node_id`.
    pub fn verify_signature(
        &self,
        secp: &bitcoin::secp256k1::Secp256k1<impl secp256k1::Verification>,
    ) -> Result<(), OffersError> {
        let sig = self.signature.ok_or_else(|| {
            OffersError::new(
                OffersErrorKind::ProtocolError,
                "invoice missing signature",
            )
        })?;
        let root = self.merkle_root()?;
        if signature::verify(
            secp,
            "invoice",
            "signature",
            root,
            &sig,
            &self.node_id,
        ) {
            Ok(())
        } else {
            Err(OffersError::new(
                OffersErrorKind::CryptoError,
                "invoice signature does not verify",
            ))
        }
    }

    pub fn encode_str(&self) -> String {
        crate::bech32::encode("lni1", &self.to_tlv().encode())
    }

    pub fn decode_str(s: &str) -> Result<Self, OffersError> {
        let bytes = crate::bech32::decode(s, "lni1")?;
        let stream = TlvStream::decode(&bytes)?;
        Self::from_tlv(&stream)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{KeyPair, Secp256k1, SecretKey};

    use super::*;

    fn keypair(secp: &Secp256k1<secp256k1::All>, byte: u8) -> KeyPair {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        KeyPair::from_secret_key(secp, sk)
    }

    fn sample(secp: &Secp256k1<secp256k1::All>) -> Invoice {
        let node_kp = keypair(secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let payer_kp = keypair(secp, 0x02);
        let (payer_key, _) = payer_kp.x_only_public_key();
        Invoice {
            offer_id: [0x11; 32],
            payer_key,
            payer_info: vec![0x22; 16],
            quantity: None,
            recurrence_counter: None,
            recurrence_start: None,
            node_id,
            description: Some("coffee".to_string()),
            vendor: None,
            amount_msat: 1_000,
            created_at: 1_700_000_000,
            relative_expiry: Some(3600),
            payment_hash: [0x33; 32],
            min_final_cltv_expiry: Some(18),
            fallbacks: vec![Fallback {
                version: 0,
                address: vec![1, 2, 3, 4],
            }],
            blinded_paths: vec![],
            recurrence_basetime: None,
            signature: None,
        }
    }

    #[test]
    fn roundtrips() {
        let secp = Secp256k1::new();
        let invoice = sample(&secp);
        let s = invoice.encode_str();
        assert!(s.starts_with("lni1"));
        assert_eq!(Invoice::decode_str(&s).unwrap(), invoice);
    }

    #[test]
    fn sign_then_verify() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let mut invoice = sample(&secp);
        let root = invoice.merkle_root().unwrap();
        let sig = signature::sign(&secp, "invoice", "signature", root, &node_kp, &[9; 32]);
        invoice.signature = Some(sig);
        invoice.verify_signature(&secp).unwrap();
    }

    #[test]
    fn recurrence_counter_requires_basetime() {
        let secp = Secp256k1::new();
        let mut invoice = sample(&secp);
        invoice.recurrence_counter = Some(0);
        let stream = invoice.to_tlv();
        assert!(Invoice::from_tlv(&stream).is_err());
    }
}
