//! Capability interfaces for the engine's external collaborators (§9 design
//! note "Dynamic dispatch across collaborators"): `Signer`, `Transport`,
//! `Gossip`, `Wallet`. [`crate::engine`] is generic over these; production
//! wires up the real signer socket / onion-message transport / gossip map /
//! wallet store, while tests substitute in-memory fakes.

use async_trait::async_trait;
use bitcoin::secp256k1::schnorr;
use common::ln::node::NodePk;

use crate::error::{FatalError, OffersError};

/// `sign_bolt12` request/reply, consumed by [`crate::request_builder`] (for
/// `recurrence_signature`) and offer-creation flows (for `offer.signature`).
///
/// Per §6: the signer owns the node identity key and the payer-base key;
/// errors from it are [`FatalError`] (the signer is trusted infrastructure,
/// not a source of recoverable validation failures).
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_bolt12(
        &self,
        message_name: &str,
        field_name: &str,
        merkle_root: [u8; 32],
        payer_info: Option<&[u8]>,
    ) -> Result<schnorr::Signature, FatalError>;

    /// The process-scoped payer base pubkey `P_base` used by
    /// [`crate::keys::PayerKeyDeriver`].
    async fn payer_base_pubkey(
        &self,
    ) -> Result<bitcoin::secp256k1::PublicKey, FatalError>;
}

/// One hop of an onion-message route, as handed to the transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteHop {
    pub node_id: NodePk,
}

/// A full onion-message send request: the forward hop list plus the blinded
/// reply path the destination should use to respond.
#[derive(Clone, Debug)]
pub struct OnionMessageSend {
    pub hops: Vec<RouteHop>,
    pub reply_path: crate::blinded_path::BlindedPath,
    pub payload: Vec<u8>,
}

/// The transport collaborator: fire-and-forget onion message send. Per §6,
/// the transport returns immediately; no synchronous acknowledgment of
/// remote delivery is expected, so failures here are [`FatalError`] (the
/// transport being unreachable at all, not the eventual reply).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_onion_message(
        &self,
        send: OnionMessageSend,
    ) -> Result<(), FatalError>;
}

/// An inbound onion message payload delivered to the engine's hook, keyed by
/// its reply-blinding point.
#[derive(Clone, Debug)]
pub enum InboundPayload {
    Invoice(Vec<u8>),
    InvoiceError(Vec<u8>),
}

/// A node as reported by the gossip oracle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GossipNode {
    pub node_id: NodePk,
    pub supports_onion_messages: bool,
}

/// A resolved path to a destination, nearest-hop first, destination last.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub hops: Vec<NodePk>,
}

/// The onion-message feature bit gossip nodes advertise to support blinded
/// reply paths (`option_onion_messages`, BOLT-9).
pub const OPT_ONION_MESSAGES_FEATURE_BIT: usize = 39;

/// The gossip oracle: an opaque "shortest path to node X that supports onion
/// messages" lookup per §6. Pathfinding itself ([`crate::router`]) only
/// consumes this trait; it never touches the underlying network graph
/// directly.
#[async_trait]
pub trait Gossip: Send + Sync {
    async fn lookup(&self, node_id: &NodePk) -> Option<GossipNode>;

    /// Dijkstra from `self` to `to`, filtered to edges whose far endpoint
    /// supports `feature_bit`.
    async fn dijkstra(
        &self,
        self_id: &NodePk,
        to: &NodePk,
        feature_bit: usize,
    ) -> Option<Route>;

    async fn node_supports(&self, node: &NodePk, feature_bit: usize) -> bool;

    /// Refresh the oracle's internal snapshot. Per §5, pathfinding calls see
    /// a consistent snapshot (no torn reads mid-Dijkstra); this method is how
    /// a caller explicitly rotates to a newer one between calls.
    async fn refresh(&self);
}

/// Lifecycle status of a persisted offer, per §3 `OfferRecord`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    SingleUse,
    MultiUse,
    Used,
    SingleDisabled,
    MultiDisabled,
}

impl OfferStatus {
    pub fn is_disabled(self) -> bool {
        matches!(self, Self::SingleDisabled | Self::MultiDisabled)
    }
}

/// A persisted offer record, per §3. The external interface's `list_offers`
/// output is this record serialized as-is.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct OfferRecord {
    #[serde(with = "hex_offer_id")]
    pub offer_id: [u8; 32],
    pub bolt12: String,
    pub label: Option<String>,
    pub status: OfferStatus,
}

/// `offer_id` serializes as a hex string in the JSON-shaped output record
/// (§6), not as a JSON array of 32 numbers.
mod hex_offer_id {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        id: &[u8; 32],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&common::hex::display(id).to_string())
    }
}

/// A completed payment record, consulted by [`crate::request_builder`] (C5)
/// to validate recurrence continuity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentRecord {
    pub offer_id: [u8; 32],
    pub label: String,
    pub recurrence_counter: u32,
    pub payer_info: Vec<u8>,
    pub complete: bool,
}

/// The wallet collaborator: offer persistence plus payment-history lookups,
/// per §6.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_offer(
        &self,
        record: OfferRecord,
    ) -> Result<(), OffersError>;

    async fn find_offer(&self, offer_id: &[u8; 32]) -> Option<OfferRecord>;

    async fn list_offers(&self) -> Vec<OfferRecord>;

    /// Transition `*_use -> *_disabled`. Idempotent if already disabled.
    async fn disable_offer(
        &self,
        offer_id: &[u8; 32],
    ) -> Result<OfferStatus, OffersError>;

    async fn list_payments_by_label(
        &self,
        label: &str,
    ) -> Vec<PaymentRecord>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offer_record_json_shape() {
        let record = OfferRecord {
            offer_id: [0x42; 32],
            bolt12: "lno1...".to_owned(),
            label: Some("coffee".to_owned()),
            status: OfferStatus::MultiUse,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value["offer_id"],
            serde_json::Value::String(
                common::hex::display(&record.offer_id).to_string()
            )
        );
        assert_eq!(value["status"], serde_json::Value::String("multi_use".to_owned()));
    }
}
