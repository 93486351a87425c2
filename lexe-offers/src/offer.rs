//! The BOLT-12 `offer` message (component C4's data model) and its TLV
//! codec.
//!
//! An [`Offer`] is the merchant's signed, immutable statement of intent to
//! be paid (or, if `send_invoice` is set, to pay out): everything downstream
//! -- request building, routing, invoice validation -- is keyed off one of
//! these. Signature verification and the "is this offer actionable at all"
//! invariants live in [`crate::manager`], which wraps the bare TLV codec
//! here with the policy BOLT-12 requires before an offer can be acted on.

use bitcoin::secp256k1::{
    self, schnorr, KeyPair, Parity, PublicKey, Secp256k1, XOnlyPublicKey,
};
use common::ln::network::LxNetwork;

use crate::{
    error::{OffersError, OffersErrorKind},
    fields::{
        self, Recurrence, RecurrenceBase, RecurrencePaywindow,
    },
    merkle,
    signature,
    tlv::TlvStream,
    wire,
};

fn sem_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::SemanticError, msg)
}

/// All even (required-to-understand) TLV types this codec knows about for
/// an `offer` record.
const KNOWN_EVEN_TYPES: &[u64] = &[
    wire::OFFER_CHAINS,
    wire::OFFER_CURRENCY,
    wire::OFFER_AMOUNT,
    wire::OFFER_DESCRIPTION,
    wire::OFFER_FEATURES,
    wire::OFFER_ABSOLUTE_EXPIRY,
    wire::OFFER_VENDOR,
    wire::OFFER_QUANTITY_MIN,
    wire::OFFER_QUANTITY_MAX,
    wire::OFFER_RECURRENCE,
    wire::OFFER_RECURRENCE_PAYWINDOW,
    wire::OFFER_RECURRENCE_LIMIT,
    wire::OFFER_RECURRENCE_BASE,
    wire::OFFER_SEND_INVOICE,
    wire::OFFER_NODE_ID,
];

/// A BOLT-12 offer. See the module docs for field semantics.
#[derive(Clone, Debug, PartialEq)]
pub struct Offer {
    pub node_id: Option<XOnlyPublicKey>,
    pub description: Option<String>,
    /// `None` means the wire form omitted this field, which BOLT-12 defines
    /// as defaulting to `[bitcoin mainnet genesis]`; use
    /// [`Offer::effective_chains`] rather than matching on this directly.
    pub chains: Option<Vec<[u8; 32]>>,
    pub features: Vec<u8>,
    pub amount: Option<u64>,
    pub currency: Option<String>,
    pub vendor: Option<String>,
    pub quantity_min: Option<u64>,
    pub quantity_max: Option<u64>,
    pub recurrence: Option<Recurrence>,
    pub recurrence_base: Option<RecurrenceBase>,
    pub recurrence_paywindow: Option<RecurrencePaywindow>,
    pub recurrence_limit: Option<u32>,
    pub absolute_expiry: Option<u64>,
    pub send_invoice: bool,
    pub signature: Option<schnorr::Signature>,
}

impl Offer {
    /// The chains this offer is payable on, with BOLT-12's default applied.
    pub fn effective_chains(&self) -> Vec<[u8; 32]> {
        match &self.chains {
            Some(chains) => chains.clone(),
            None => vec![LxNetwork::Mainnet.genesis_chain_hash().to_bytes()],
        }
    }

    pub fn supports_chain(&self, chain: [u8; 32]) -> bool {
        self.effective_chains().contains(&chain)
    }

    pub fn expects_quantity(&self) -> bool {
        self.quantity_min.is_some() || self.quantity_max.is_some()
    }

    /// `quantity_min` with BOLT-12's default of 1 applied.
    pub fn min_quantity(&self) -> u64 {
        self.quantity_min.unwrap_or(1)
    }

    /// `quantity_max`, or `None` for "unbounded".
    pub fn max_quantity(&self) -> Option<u64> {
        self.quantity_max
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        matches!(self.absolute_expiry, Some(exp) if exp < now_secs)
    }

    /// The full (even-parity) pubkey behind `node_id`, for collaborators
    /// (the gossip oracle, the transport's hop list) that deal in full
    /// compressed pubkeys rather than BOLT-12's X-only wire encoding.
    ///
    /// Per BOLT-340/BOLT-12 convention, a node publishes the even-parity
    /// counterpart of its X-only id; this is a lossless re-derivation, not a
    /// guess.
    pub fn node_id_full_pubkey(&self) -> Option<PublicKey> {
        self.node_id.map(|x| x.public_key(Parity::Even))
    }

    /// Build the TLV stream for this offer, including its signature (if
    /// any). Field order is enforced by [`TlvStream`] itself.
    pub fn to_tlv(&self) -> TlvStream {
        let mut s = TlvStream::new();
        if let Some(chains) = &self.chains {
            s.insert(wire::OFFER_CHAINS, fields::encode_chunks32(chains));
        }
        if let Some(currency) = &self.currency {
            s.insert(wire::OFFER_CURRENCY, currency.as_bytes().to_vec());
        }
        if let Some(amount) = self.amount {
            s.insert(wire::OFFER_AMOUNT, fields::encode_tu64(amount));
        }
        if let Some(description) = &self.description {
            s.insert(wire::OFFER_DESCRIPTION, description.as_bytes().to_vec());
        }
        if !self.features.is_empty() {
            s.insert(wire::OFFER_FEATURES, self.features.clone());
        }
        if let Some(expiry) = self.absolute_expiry {
            s.insert(wire::OFFER_ABSOLUTE_EXPIRY, fields::encode_tu64(expiry));
        }
        if let Some(vendor) = &self.vendor {
            s.insert(wire::OFFER_VENDOR, vendor.as_bytes().to_vec());
        }
        if let Some(qmin) = self.quantity_min {
            s.insert(wire::OFFER_QUANTITY_MIN, fields::encode_tu64(qmin));
        }
        if let Some(qmax) = self.quantity_max {
            s.insert(wire::OFFER_QUANTITY_MAX, fields::encode_tu64(qmax));
        }
        if let Some(r) = &self.recurrence {
            s.insert(wire::OFFER_RECURRENCE, fields::encode_recurrence(r));
        }
        if let Some(pw) = &self.recurrence_paywindow {
            s.insert(
                wire::OFFER_RECURRENCE_PAYWINDOW,
                fields::encode_recurrence_paywindow(pw),
            );
        }
        if let Some(limit) = self.recurrence_limit {
            s.insert(
                wire::OFFER_RECURRENCE_LIMIT,
                fields::encode_tu32(limit),
            );
        }
        if let Some(base) = &self.recurrence_base {
            s.insert(
                wire::OFFER_RECURRENCE_BASE,
                fields::encode_recurrence_base(base),
            );
        }
        if self.send_invoice {
            s.insert(wire::OFFER_SEND_INVOICE, Vec::new());
        }
        if let Some(node_id) = &self.node_id {
            s.insert(wire::OFFER_NODE_ID, fields::encode_xonly_pubkey(node_id));
        }
        if let Some(sig) = &self.signature {
            s.insert(wire::SIG_SIGNATURE, sig.as_ref().to_vec());
        }
        s
    }

    /// Parse an [`Offer`] out of an already-decoded TLV stream. Does *not*
    /// enforce the "actionable" invariants (`node_id`/`description`/
    /// `signature` present, signature verifies) -- see
    /// [`crate::manager::OfferManager::decode_offer`] for that.
    pub fn from_tlv(stream: &TlvStream) -> Result<Self, OffersError> {
        stream.check_known_even_types(KNOWN_EVEN_TYPES)?;

        let chains = stream
            .get(wire::OFFER_CHAINS)
            .map(|v| fields::decode_chunks32("offer_chains", v))
            .transpose()?;
        let currency = stream
            .get(wire::OFFER_CURRENCY)
            .map(|v| fields::decode_utf8("offer_currency", v))
            .transpose()?;
        let amount = stream
            .get(wire::OFFER_AMOUNT)
            .map(fields::decode_tu64)
            .transpose()?;
        let description = stream
            .get(wire::OFFER_DESCRIPTION)
            .map(|v| fields::decode_utf8("offer_description", v))
            .transpose()?;
        let features = stream
            .get(wire::OFFER_FEATURES)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let absolute_expiry = stream
            .get(wire::OFFER_ABSOLUTE_EXPIRY)
            .map(fields::decode_tu64)
            .transpose()?;
        let vendor = stream
            .get(wire::OFFER_VENDOR)
            .map(|v| fields::decode_utf8("offer_vendor", v))
            .transpose()?;
        let quantity_min = stream
            .get(wire::OFFER_QUANTITY_MIN)
            .map(fields::decode_tu64)
            .transpose()?;
        let quantity_max = stream
            .get(wire::OFFER_QUANTITY_MAX)
            .map(fields::decode_tu64)
            .transpose()?;
        let recurrence = stream
            .get(wire::OFFER_RECURRENCE)
            .map(fields::decode_recurrence)
            .transpose()?;
        let recurrence_paywindow = stream
            .get(wire::OFFER_RECURRENCE_PAYWINDOW)
            .map(fields::decode_recurrence_paywindow)
            .transpose()?;
        let recurrence_limit = stream
            .get(wire::OFFER_RECURRENCE_LIMIT)
            .map(fields::decode_tu32)
            .transpose()?;
        let recurrence_base = stream
            .get(wire::OFFER_RECURRENCE_BASE)
            .map(fields::decode_recurrence_base)
            .transpose()?;
        let send_invoice = stream.contains(wire::OFFER_SEND_INVOICE);
        let node_id = stream
            .get(wire::OFFER_NODE_ID)
            .map(|v| fields::decode_xonly_pubkey("offer_node_id", v))
            .transpose()?;
        let signature = stream
            .get(wire::SIG_SIGNATURE)
            .map(|v| decode_signature(v))
            .transpose()?;

        if recurrence.is_none()
            && (recurrence_base.is_some()
                || recurrence_paywindow.is_some()
                || recurrence_limit.is_some())
        {
            return Err(sem_err(
                "recurrence_base/paywindow/limit present without recurrence",
            ));
        }

        Ok(Self {
            node_id,
            description,
            chains,
            features,
            amount,
            currency,
            vendor,
            quantity_min,
            quantity_max,
            recurrence,
            recurrence_base,
            recurrence_paywindow,
            recurrence_limit,
            absolute_expiry,
            send_invoice,
            signature,
        })
    }

    /// `offer_id`: the merkle root over this offer's non-signature fields.
    pub fn offer_id(&self) -> Result<[u8; 32], OffersError> {
        merkle::merkle_root(&self.to_tlv())
            .ok_or_else(|| sem_err("offer has no fields to hash"))
    }

    /// Verify `self.signature` against `self.node_id` using [`signature`].
    /// Fails if either is unset.
    pub fn verify_signature(
        &self,
        secp: &Secp256k1<impl secp256k1::Verification>,
    ) -> Result<(), OffersError> {
        let node_id = self
            .node_id
            .ok_or_else(|| sem_err("offer missing node_id"))?;
        let sig = self
            .signature
            .ok_or_else(|| sem_err("offer missing signature"))?;
        let root = merkle::merkle_root(&self.to_tlv())
            .ok_or_else(|| sem_err("offer has no fields to hash"))?;
        if signature::verify(secp, "offer", "signature", root, &sig, &node_id)
        {
            Ok(())
        } else {
            Err(OffersError::new(
                OffersErrorKind::CryptoError,
                "offer signature does not verify",
            ))
        }
    }

    pub fn encode_str(&self) -> String {
        crate::bech32::encode("lno1", &self.to_tlv().encode())
    }

    pub fn decode_str(s: &str) -> Result<Self, OffersError> {
        let bytes = crate::bech32::decode(s, "lno1")?;
        let stream = TlvStream::decode(&bytes)?;
        Self::from_tlv(&stream)
    }
}

fn decode_signature(value: &[u8]) -> Result<schnorr::Signature, OffersError> {
    schnorr::Signature::from_slice(value).map_err(|e| {
        OffersError::new(
            OffersErrorKind::ParseError,
            format!("malformed signature: {e}"),
        )
    })
}

/// A builder for constructing and signing new [`Offer`]s, mirroring the
/// "build up fields, then sign" shape of LDK's `OfferBuilder`.
pub struct OfferBuilder {
    offer: Offer,
}

impl OfferBuilder {
    pub fn new(node_id: XOnlyPublicKey, description: String) -> Self {
        Self {
            offer: Offer {
                node_id: Some(node_id),
                description: Some(description),
                chains: None,
                features: Vec::new(),
                amount: None,
                currency: None,
                vendor: None,
                quantity_min: None,
                quantity_max: None,
                recurrence: None,
                recurrence_base: None,
                recurrence_paywindow: None,
                recurrence_limit: None,
                absolute_expiry: None,
                send_invoice: false,
                signature: None,
            },
        }
    }

    pub fn amount_msat(mut self, amount: u64) -> Self {
        self.offer.amount = Some(amount);
        self
    }

    pub fn currency(mut self, code: impl Into<String>, amount: u64) -> Self {
        self.offer.currency = Some(code.into());
        self.offer.amount = Some(amount);
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.offer.vendor = Some(vendor.into());
        self
    }

    pub fn chains(mut self, chains: Vec<[u8; 32]>) -> Self {
        self.offer.chains = Some(chains);
        self
    }

    pub fn features(mut self, features: Vec<u8>) -> Self {
        self.offer.features = features;
        self
    }

    pub fn quantity_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.offer.quantity_min = min;
        self.offer.quantity_max = max;
        self
    }

    pub fn recurrence(
        mut self,
        recurrence: Recurrence,
        base: RecurrenceBase,
    ) -> Self {
        self.offer.recurrence = Some(recurrence);
        self.offer.recurrence_base = Some(base);
        self
    }

    pub fn recurrence_paywindow(mut self, pw: RecurrencePaywindow) -> Self {
        self.offer.recurrence_paywindow = Some(pw);
        self
    }

    pub fn recurrence_limit(mut self, limit: u32) -> Self {
        self.offer.recurrence_limit = Some(limit);
        self
    }

    pub fn absolute_expiry(mut self, expiry_secs: u64) -> Self {
        self.offer.absolute_expiry = Some(expiry_secs);
        self
    }

    pub fn send_invoice(mut self) -> Self {
        self.offer.send_invoice = true;
        self
    }

    /// Sign and finalize the offer.
    pub fn build(
        mut self,
        secp: &Secp256k1<secp256k1::All>,
        keypair: &KeyPair,
        aux_rand: &[u8; 32],
    ) -> Result<Offer, OffersError> {
        let root = merkle::merkle_root(&self.offer.to_tlv())
            .ok_or_else(|| sem_err("offer has no fields to hash"))?;
        let sig =
            signature::sign(secp, "offer", "signature", root, keypair, aux_rand);
        self.offer.signature = Some(sig);
        Ok(self.offer)
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

    fn signed_offer(secp: &Secp256k1<secp256k1::All>) -> Offer {
        let kp = keypair(secp, 0x42);
        let (node_id, _parity) = kp.x_only_public_key();
        OfferBuilder::new(node_id, "coffee".to_string())
            .amount_msat(1_000)
            .build(secp, &kp, &[7; 32])
            .unwrap()
    }

    #[test]
    fn roundtrips_through_bech32_and_tlv() {
        let secp = Secp256k1::new();
        let offer = signed_offer(&secp);
        let s = offer.encode_str();
        assert!(s.starts_with("lno1"));
        let decoded = Offer::decode_str(&s).unwrap();
        assert_eq!(offer, decoded);
    }

    #[test]
    fn valid_signature_verifies() {
        let secp = Secp256k1::new();
        let offer = signed_offer(&secp);
        offer.verify_signature(&secp).unwrap();
    }

    #[test]
    fn mutated_field_breaks_signature() {
        let secp = Secp256k1::new();
        let mut offer = signed_offer(&secp);
        offer.description = Some("muffin".to_string());
        assert!(offer.verify_signature(&secp).is_err());
    }

    #[test]
    fn default_chain_is_bitcoin_mainnet() {
        let secp = Secp256k1::new();
        let offer = signed_offer(&secp);
        assert_eq!(offer.chains, None);
        assert_eq!(
            offer.effective_chains(),
            vec![LxNetwork::Mainnet.genesis_chain_hash().to_bytes()]
        );
    }

    #[test]
    fn unknown_even_type_is_rejected() {
        let secp = Secp256k1::new();
        let offer = signed_offer(&secp);
        let mut stream = offer.to_tlv();
        stream.insert(16, vec![1, 2, 3]);
        assert!(Offer::from_tlv(&stream).is_err());
    }

    #[test]
    fn offer_id_is_insensitive_to_signature() {
        let secp = Secp256k1::new();
        let offer = signed_offer(&secp);
        let mut unsigned = offer.clone();
        unsigned.signature = None;
        assert_eq!(offer.offer_id().unwrap(), unsigned.offer_id().unwrap());
    }
}
