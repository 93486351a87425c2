//! The BOLT-12 `invoice_request` message: a payer's binding of an offer to
//! one specific payment instance.
//!
//! This module only implements the wire codec (C1's job applied to this
//! message kind) plus the recurrence-signature helper; the *rules* for what
//! an `invoice_request` is allowed to contain given its originating offer
//! live in [`crate::request_builder`] (C5), since those rules need the
//! offer, user parameters, and payment history all at once.

use bitcoin::secp256k1::{self, schnorr, KeyPair, Secp256k1, XOnlyPublicKey};

use crate::{
    error::{OffersError, OffersErrorKind},
    fields,
    merkle, signature,
    tlv::TlvStream,
    wire,
};

const KNOWN_EVEN_TYPES: &[u64] = &[
    wire::OFFER_CHAINS,
    wire::OFFER_FEATURES,
    wire::INVREQ_OFFER_ID,
    wire::INVREQ_AMOUNT,
    wire::INVREQ_QUANTITY,
    wire::INVREQ_RECURRENCE_COUNTER,
    wire::INVREQ_RECURRENCE_START,
    wire::INVREQ_PAYER_KEY,
    wire::INVREQ_PAYER_INFO,
    wire::INVREQ_PAYER_NOTE,
];

/// A BOLT-12 invoice_request: binds an offer to a specific payment instance
/// (amount/quantity/recurrence/payer_key).
#[derive(Clone, Debug, PartialEq)]
pub struct InvoiceRequest {
    /// Present only when the target chain isn't the BOLT-12 default
    /// (bitcoin mainnet).
    pub chain: Option<[u8; 32]>,
    pub features: Vec<u8>,
    /// Present iff the originating offer omitted `amount`.
    pub amount: Option<u64>,
    /// Present iff the originating offer specified a quantity range.
    pub quantity: Option<u64>,
    pub offer_id: [u8; 32],
    pub payer_key: XOnlyPublicKey,
    pub payer_info: Vec<u8>,
    pub payer_note: Option<String>,
    /// Present iff the originating offer has `recurrence`.
    pub recurrence_counter: Option<u32>,
    /// Present iff the originating offer's `recurrence_base.start_any_period
    /// != 0`.
    pub recurrence_start: Option<u32>,
    /// Present iff the originating offer has `recurrence`.
    pub recurrence_signature: Option<schnorr::Signature>,
}

impl InvoiceRequest {
    pub fn to_tlv(&self) -> TlvStream {
        let mut s = TlvStream::new();
        if let Some(chain) = &self.chain {
            s.insert(wire::OFFER_CHAINS, fields::encode_hash32(chain));
        }
        if !self.features.is_empty() {
            s.insert(wire::OFFER_FEATURES, self.features.clone());
        }
        s.insert(wire::INVREQ_OFFER_ID, fields::encode_hash32(&self.offer_id));
        if let Some(amount) = self.amount {
            s.insert(wire::INVREQ_AMOUNT, fields::encode_tu64(amount));
        }
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
        s.insert(
            wire::INVREQ_PAYER_KEY,
            fields::encode_xonly_pubkey(&self.payer_key),
        );
        s.insert(wire::INVREQ_PAYER_INFO, self.payer_info.clone());
        if let Some(note) = &self.payer_note {
            s.insert(wire::INVREQ_PAYER_NOTE, note.as_bytes().to_vec());
        }
        if let Some(sig) = &self.recurrence_signature {
            s.insert(wire::SIG_RECURRENCE_SIGNATURE, sig.as_ref().to_vec());
        }
        s
    }

    pub fn from_tlv(stream: &TlvStream) -> Result<Self, OffersError> {
        stream.check_known_even_types(KNOWN_EVEN_TYPES)?;

        let chain = stream
            .get(wire::OFFER_CHAINS)
            .map(|v| fields::decode_hash32("chain", v))
            .transpose()?;
        let features = stream
            .get(wire::OFFER_FEATURES)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let offer_id = fields::decode_hash32(
            "invreq_offer_id",
            stream.get(wire::INVREQ_OFFER_ID).ok_or_else(|| {
                OffersError::new(
                    OffersErrorKind::ParseError,
                    "invoice_request missing offer_id",
                )
            })?,
        )?;
        let amount = stream
            .get(wire::INVREQ_AMOUNT)
            .map(fields::decode_tu64)
            .transpose()?;
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
        let payer_key = fields::decode_xonly_pubkey(
            "invreq_payer_id",
            stream.get(wire::INVREQ_PAYER_KEY).ok_or_else(|| {
                OffersError::new(
                    OffersErrorKind::ParseError,
                    "invoice_request missing payer_key",
                )
            })?,
        )?;
        let payer_info = stream
            .get(wire::INVREQ_PAYER_INFO)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let payer_note = stream
            .get(wire::INVREQ_PAYER_NOTE)
            .map(|v| fields::decode_utf8("invreq_payer_note", v))
            .transpose()?;
        let recurrence_signature = stream
            .get(wire::SIG_RECURRENCE_SIGNATURE)
            .map(|v| {
                schnorr::Signature::from_slice(v).map_err(|e| {
                    OffersError::new(
                        OffersErrorKind::ParseError,
                        format!("malformed recurrence_signature: {e}"),
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            chain,
            features,
            amount,
            quantity,
            offer_id,
            payer_key,
            payer_info,
            payer_note,
            recurrence_counter,
            recurrence_start,
            recurrence_signature,
        })
    }

    pub fn merkle_root(&self) -> Result<[u8; 32], OffersError> {
        merkle::merkle_root(&self.to_tlv()).ok_or_else(|| {
            OffersError::new(
                OffersErrorKind::SemanticError,
                "invoice_request has no fields to hash",
            )
        })
    }

    /// Sign `recurrence_signature` over this request's merkle root, per
    /// §4.5: "obtain `recurrence_signature` from the signer ... including
    /// `payer_info` as auxiliary signer input". The payer_info is mixed into
    /// the BIP-340 aux-rand here to tie the nonce to this specific request
    /// instance without the core needing the signer's secret key.
    pub fn sign_recurrence(
        &mut self,
        secp: &Secp256k1<secp256k1::All>,
        keypair: &KeyPair,
    ) -> Result<(), OffersError> {
        let root = self.merkle_root()?;
        let mut aux_rand = [0u8; 32];
        let mixed = common::sha256::digest(&self.payer_info);
        aux_rand.copy_from_slice(mixed.as_ref());
        let sig = signature::sign(
            secp,
            "invoice_request",
            "recurrence_signature",
            root,
            keypair,
            &aux_rand,
        );
        self.recurrence_signature = Some(sig);
        Ok(())
    }

    /// Verify `recurrence_signature` against `payer_key`. Addresses the
    /// source's `FIXME: Validate signature!` (design note §9(1)): we verify
    /// before ever accepting the recurrence signature as authorization to
    /// proceed.
    pub fn verify_recurrence_signature(
        &self,
        secp: &Secp256k1<impl secp256k1::Verification>,
    ) -> Result<(), OffersError> {
        let sig = self.recurrence_signature.ok_or_else(|| {
            OffersError::new(
                OffersErrorKind::SemanticError,
                "invoice_request missing recurrence_signature",
            )
        })?;
        let root = self.merkle_root()?;
        if signature::verify(
            secp,
            "invoice_request",
            "recurrence_signature",
            root,
            &sig,
            &self.payer_key,
        ) {
            Ok(())
        } else {
            Err(OffersError::new(
                OffersErrorKind::CryptoError,
                "invoice_request recurrence_signature does not verify",
            ))
        }
    }

    pub fn encode_str(&self) -> String {
        crate::bech32::encode("lnr1", &self.to_tlv().encode())
    }

    pub fn decode_str(s: &str) -> Result<Self, OffersError> {
        let bytes = crate::bech32::decode(s, "lnr1")?;
        let stream = TlvStream::decode(&bytes)?;
        Self::from_tlv(&stream)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;

    use super::*;

    fn keypair(secp: &Secp256k1<secp256k1::All>, byte: u8) -> KeyPair {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        KeyPair::from_secret_key(secp, sk)
    }

    fn sample(secp: &Secp256k1<secp256k1::All>) -> InvoiceRequest {
        let payer_kp = keypair(secp, 0x11);
        let (payer_key, _) = payer_kp.x_only_public_key();
        InvoiceRequest {
            chain: None,
            features: vec![],
            amount: Some(1_000),
            quantity: None,
            offer_id: [0x55; 32],
            payer_key,
            payer_info: vec![0xAA; 16],
            payer_note: Some("thanks".to_string()),
            recurrence_counter: None,
            recurrence_start: None,
            recurrence_signature: None,
        }
    }

    #[test]
    fn roundtrips() {
        let secp = Secp256k1::new();
        let invreq = sample(&secp);
        let s = invreq.encode_str();
        assert!(s.starts_with("lnr1"));
        assert_eq!(InvoiceRequest::decode_str(&s).unwrap(), invreq);
    }

    #[test]
    fn recurrence_signature_sign_then_verify() {
        let secp = Secp256k1::new();
        let payer_kp = keypair(&secp, 0x11);
        let mut invreq = sample(&secp);
        invreq.recurrence_counter = Some(0);
        invreq.sign_recurrence(&secp, &payer_kp).unwrap();
        invreq.verify_recurrence_signature(&secp).unwrap();
    }

    #[test]
    fn tampered_request_fails_recurrence_signature() {
        let secp = Secp256k1::new();
        let payer_kp = keypair(&secp, 0x11);
        let mut invreq = sample(&secp);
        invreq.recurrence_counter = Some(0);
        invreq.sign_recurrence(&secp, &payer_kp).unwrap();
        invreq.recurrence_counter = Some(1);
        assert!(invreq.verify_recurrence_signature(&secp).is_err());
    }
}
