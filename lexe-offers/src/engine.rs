//! The offer-to-invoice exchange engine (component C7): the state machine
//! that turns a `fetch_invoice` call into a built, routed, sent
//! invoice_request, then correlates and validates the asynchronous onion-
//! message reply.
//!
//! Conceptually this is a single-threaded cooperative event loop:
//! `outstanding` is the only mutable state, and every mutation happens
//! either from [`Engine::fetch_invoice`] (on send) or
//! [`Engine::on_onion_message`] (on reply/ignore). Since real callers invoke
//! both from independent tasks (a user command task and a transport hook
//! task), the table is still guarded by a plain [`std::sync::Mutex`] -- the
//! critical sections never hold the lock across an `.await`, so this adds
//! no actual contention over that single-threaded model.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use bitcoin::secp256k1::{self, Secp256k1, XOnlyPublicKey};
use common::{ln::node::NodePk, rng::Crng};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    capabilities::{Gossip, InboundPayload, Signer, Transport, Wallet},
    error::{FatalError, OffersError, OffersErrorKind},
    invoice::Invoice,
    invoice_request::InvoiceRequest,
    keys::PayerKeyDeriver,
    offer::Offer,
    recurrence::{self, NextPeriod},
    request_builder::{self, BuildError, RequestParams},
    router,
    tlv::{read_be_tu64, TlvStream},
    wire,
};

fn overflow_err() -> OffersError {
    OffersError::new(
        OffersErrorKind::SemanticError,
        "recurrence period arithmetic overflowed",
    )
}

/// Tunables injected at construction: the per-request deadline `T_request`
/// (§4.7/§9, default 60s).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub request_deadline: Duration,
    /// Our own feature bits, echoed into every `invoice_request` we build.
    pub features: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(60),
            features: Vec::new(),
        }
    }
}

/// A full diff of `offer.description` vs the returned `invoice.description`,
/// per §4.7 step 7.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionChange {
    /// The invoice description is the offer's verbatim, with this suffix
    /// appended.
    Appended(String),
    /// The offer had a description; the invoice has none.
    Removed,
    /// Any other change: the invoice's description in full.
    Full(String),
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorChange {
    Removed,
    Full(String),
}

/// The "authorization confirmation" surface (§4.7 step 7): everything about
/// the returned invoice that differs from what the offer promised, for the
/// caller to show the user before paying. JSON-shaped per the external
/// interface's `{changes: {...}}` output record.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct InvoiceChanges {
    pub description: Option<DescriptionChange>,
    pub vendor: Option<VendorChange>,
    /// Set whenever the invoice's amount isn't exactly what the offer's
    /// fixed amount (times quantity) predicted, including when the offer
    /// had no fixed amount at all.
    pub msat: Option<u64>,
}

/// The successful result of [`Engine::fetch_invoice`].
#[derive(Clone, Debug)]
pub struct FetchInvoiceOutcome {
    pub invoice: Invoice,
    pub invoice_string: String,
    pub changes: InvoiceChanges,
    pub next_period: Option<NextPeriod>,
}

/// A decoded (best-effort) `invoice_error` reply, per §4.7 step 3. BOLT-12
/// doesn't guarantee every field is present, so this is deliberately
/// permissive: a malformed `invoice_error` still yields a value rather than
/// a parse failure, since its entire purpose is to report failure.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct RemoteInvoiceError {
    pub erroneous_field: Option<u64>,
    pub suggested_value: Option<Vec<u8>>,
    pub error_text: String,
}

fn decode_invoice_error(bytes: &[u8]) -> RemoteInvoiceError {
    let Ok(stream) = TlvStream::decode(bytes) else {
        return RemoteInvoiceError {
            error_text: "<malformed invoice_error>".to_string(),
            ..Default::default()
        };
    };
    let erroneous_field = stream
        .get(wire::INVOICE_ERROR_ERRONEOUS_FIELD)
        .and_then(|v| read_be_tu64(v).ok());
    let suggested_value = stream
        .get(wire::INVOICE_ERROR_SUGGESTED_VALUE)
        .map(|v| v.to_vec());
    let error_text = stream
        .get(wire::INVOICE_ERROR_MESSAGE)
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();
    RemoteInvoiceError {
        erroneous_field,
        suggested_value,
        error_text,
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Invalid(#[from] OffersError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("request timed out waiting for a reply")]
    Timeout,
    #[error("counterparty returned invoice_error: {0:?}")]
    RemoteError(RemoteInvoiceError),
}

impl From<BuildError> for EngineError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Invalid(e) => Self::Invalid(e),
            BuildError::Fatal(e) => Self::Fatal(e),
        }
    }
}

/// The resolution handed from [`Engine::on_onion_message`] back to the
/// suspended [`Engine::fetch_invoice`] call, over a one-shot channel keyed
/// by `reply_blinding`.
type EngineReply = Result<FetchInvoiceOutcome, EngineFail>;

enum EngineFail {
    Invalid(OffersError),
    Remote(RemoteInvoiceError),
}

struct OutstandingEntry {
    offer: Offer,
    invreq: InvoiceRequest,
    tx: oneshot::Sender<EngineReply>,
}

/// Process-wide engine context (§9 "global state" design note): the
/// outstanding-request table, the gossip/signer/transport/wallet handles,
/// and our own node/payer identity. Bundled into one value so tests can
/// substitute fakes for every collaborator without any hidden globals.
pub struct Engine {
    secp: Secp256k1<secp256k1::All>,
    config: EngineConfig,
    self_id: NodePk,
    signer: Arc<dyn Signer>,
    transport: Arc<dyn Transport>,
    gossip: Arc<dyn Gossip>,
    wallet: Arc<dyn Wallet>,
    deriver: PayerKeyDeriver,
    outstanding: Mutex<HashMap<XOnlyPublicKey, OutstandingEntry>>,
}

/// Removes an engine's outstanding entry when dropped, whether that's
/// because the exchange resolved normally or because the caller's future
/// was cancelled mid-flight. Per §5 "cancellation": a cancelled command's
/// outstanding record is removed and any late reply on its blinding is
/// dropped as "no match" -- which falls out for free once lookup-and-remove
/// in [`Engine::on_onion_message`] is the only way to observe this table.
struct RemoveOnDrop<'a> {
    engine: &'a Engine,
    key: XOnlyPublicKey,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        self.engine.outstanding.lock().unwrap().remove(&self.key);
    }
}

impl Engine {
    pub fn new(
        secp: Secp256k1<secp256k1::All>,
        config: EngineConfig,
        self_id: NodePk,
        signer: Arc<dyn Signer>,
        transport: Arc<dyn Transport>,
        gossip: Arc<dyn Gossip>,
        wallet: Arc<dyn Wallet>,
        deriver: PayerKeyDeriver,
    ) -> Self {
        Self {
            secp,
            config,
            self_id,
            signer,
            transport,
            gossip,
            wallet,
            deriver,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// The user-visible `fetch_invoice` operation: build a request, route
    /// and send it, then suspend until the matching reply arrives, an
    /// `invoice_error` comes back, or the deadline elapses.
    pub async fn fetch_invoice<R: Crng>(
        &self,
        rng: &mut R,
        offer: Offer,
        params: RequestParams,
        now_secs: u64,
    ) -> Result<FetchInvoiceOutcome, EngineError> {
        let invreq = request_builder::build(
            &self.secp,
            rng,
            self.wallet.as_ref(),
            self.signer.as_ref(),
            &self.deriver,
            &offer,
            params,
            now_secs,
        )
        .await?;

        let dest = offer
            .node_id_full_pubkey()
            .map(NodePk)
            .ok_or_else(|| {
                OffersError::new(
                    OffersErrorKind::RoutingError,
                    "offer has no node_id to route to",
                )
            })?;

        let route =
            router::find_route(self.gossip.as_ref(), &self.self_id, &dest)
                .await?;
        let (reply_path, reply_blinding) = router::build_reply_path(
            &self.secp,
            rng,
            &route,
            &self.self_id,
        )?;
        let send =
            router::build_send(&route, reply_path, invreq.to_tlv().encode());

        let (tx, rx) = oneshot::channel();
        self.outstanding.lock().unwrap().insert(
            reply_blinding,
            OutstandingEntry {
                offer,
                invreq,
                tx,
            },
        );
        let _guard = RemoveOnDrop {
            engine: self,
            key: reply_blinding,
        };

        self.transport.send_onion_message(send).await?;

        tokio::select! {
            reply = rx => match reply {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(EngineFail::Invalid(e))) => Err(EngineError::Invalid(e)),
                Ok(Err(EngineFail::Remote(e))) => Err(EngineError::RemoteError(e)),
                Err(_canceled) => Err(EngineError::Invalid(OffersError::new(
                    OffersErrorKind::ProtocolError,
                    "reply channel closed without a reply",
                ))),
            },
            _ = tokio::time::sleep(self.config.request_deadline) => {
                Err(EngineError::Timeout)
            }
        }
    }

    /// The transport's inbound hook: deliver an onion message keyed by its
    /// reply-blinding point, per §4.7's "on inbound onion message" steps.
    pub async fn on_onion_message(
        &self,
        blinding_in: XOnlyPublicKey,
        payload: InboundPayload,
    ) {
        let entry = self.outstanding.lock().unwrap().remove(&blinding_in);
        let Some(entry) = entry else {
            debug!("inbound onion message matched no outstanding request");
            return;
        };

        let reply = match payload {
            InboundPayload::InvoiceError(bytes) => {
                let err = decode_invoice_error(&bytes);
                warn!(
                    error_text = %err.error_text,
                    "counterparty replied with invoice_error"
                );
                Err(EngineFail::Remote(err))
            }
            InboundPayload::Invoice(bytes) => {
                match TlvStream::decode(&bytes)
                    .and_then(|s| Invoice::from_tlv(&s))
                {
                    Err(e) => {
                        Err(EngineFail::Invalid(OffersError::bad_invoice(
                            "invoice",
                            e,
                        )))
                    }
                    Ok(invoice) => match validate_invoice(
                        &self.secp,
                        &entry.offer,
                        &entry.invreq,
                        &invoice,
                    ) {
                        Ok((changes, next_period)) => {
                            let invoice_string = invoice.encode_str();
                            Ok(FetchInvoiceOutcome {
                                invoice,
                                invoice_string,
                                changes,
                                next_period,
                            })
                        }
                        Err(e) => Err(EngineFail::Invalid(e)),
                    },
                }
            }
        };

        debug!(accepted = reply.is_ok(), "resolved outstanding request");
        let _ = entry.tx.send(reply);
    }
}

/// Validate a returned invoice against its originating offer and
/// invoice_request, per §4.7 steps 5-8. Fails on the first mismatched
/// field.
fn validate_invoice(
    secp: &Secp256k1<impl secp256k1::Verification>,
    offer: &Offer,
    invreq: &InvoiceRequest,
    invoice: &Invoice,
) -> Result<(InvoiceChanges, Option<NextPeriod>), OffersError> {
    let offer_node_id = offer.node_id.ok_or_else(|| {
        OffersError::new(OffersErrorKind::SemanticError, "offer missing node_id")
    })?;
    if invoice.node_id != offer_node_id {
        return Err(OffersError::bad_invoice(
            "node_id",
            "does not match the offer's node_id",
        ));
    }

    invoice
        .verify_signature(secp)
        .map_err(|_| OffersError::bad_invoice("signature", "does not verify"))?;

    if invoice.offer_id != invreq.offer_id {
        return Err(OffersError::bad_invoice(
            "offer_id",
            "does not match the invoice_request",
        ));
    }
    if invoice.quantity != invreq.quantity {
        return Err(OffersError::bad_invoice(
            "quantity",
            "does not match the invoice_request",
        ));
    }
    if invoice.recurrence_counter != invreq.recurrence_counter {
        return Err(OffersError::bad_invoice(
            "recurrence_counter",
            "does not match the invoice_request",
        ));
    }
    if invoice.recurrence_start != invreq.recurrence_start {
        return Err(OffersError::bad_invoice(
            "recurrence_start",
            "does not match the invoice_request",
        ));
    }
    if invoice.payer_key != invreq.payer_key {
        return Err(OffersError::bad_invoice(
            "payer_key",
            "does not match the invoice_request",
        ));
    }
    if invoice.payer_info != invreq.payer_info {
        return Err(OffersError::bad_invoice(
            "payer_info",
            "does not match the invoice_request",
        ));
    }
    if invreq.recurrence_counter.is_some() && invoice.recurrence_basetime.is_none()
    {
        return Err(OffersError::bad_invoice(
            "recurrence_basetime",
            "missing for a recurring invoice_request",
        ));
    }

    let expected_amount = match (offer.amount, &offer.currency) {
        (Some(amount), None) => {
            let quantity = invreq.quantity.unwrap_or(1).max(1);
            Some(amount.checked_mul(quantity).ok_or_else(|| {
                OffersError::bad_invoice("quantity", "overflows the expected amount")
            })?)
        }
        _ => None,
    };

    let changes = InvoiceChanges {
        description: diff_description(
            offer.description.as_deref(),
            invoice.description.as_deref(),
        ),
        vendor: diff_vendor(offer.vendor.as_deref(), invoice.vendor.as_deref()),
        msat: match expected_amount {
            Some(exp) if exp == invoice.amount_msat => None,
            _ => Some(invoice.amount_msat),
        },
    };

    let next_period = compute_next_period(offer, invreq, invoice)?;

    Ok((changes, next_period))
}

fn diff_description(
    offer_desc: Option<&str>,
    invoice_desc: Option<&str>,
) -> Option<DescriptionChange> {
    if offer_desc == invoice_desc {
        return None;
    }
    match (offer_desc, invoice_desc) {
        (Some(offer), Some(invoice))
            if invoice.starts_with(offer) && invoice.len() > offer.len() =>
        {
            Some(DescriptionChange::Appended(
                invoice[offer.len()..].to_string(),
            ))
        }
        (Some(_), None) => Some(DescriptionChange::Removed),
        (_, Some(invoice)) => Some(DescriptionChange::Full(invoice.to_string())),
        (None, None) => None,
    }
}

fn diff_vendor(
    offer_vendor: Option<&str>,
    invoice_vendor: Option<&str>,
) -> Option<VendorChange> {
    if offer_vendor == invoice_vendor {
        return None;
    }
    match invoice_vendor {
        None => Some(VendorChange::Removed),
        Some(v) => Some(VendorChange::Full(v.to_string())),
    }
}

/// §4.7 step 8: compute the next recurrence window, gated on
/// `recurrence_limit`.
fn compute_next_period(
    offer: &Offer,
    invreq: &InvoiceRequest,
    invoice: &Invoice,
) -> Result<Option<NextPeriod>, OffersError> {
    let (Some(recurrence), Some(completed_counter)) =
        (offer.recurrence, invreq.recurrence_counter)
    else {
        return Ok(None);
    };

    let next_counter = completed_counter.checked_add(1).ok_or_else(overflow_err)?;
    let next_idx = (invreq.recurrence_start.unwrap_or(0) as u64)
        .checked_add(next_counter as u64)
        .ok_or_else(overflow_err)?;
    let within_limit = offer
        .recurrence_limit
        .map_or(true, |limit| next_idx <= limit as u64);
    if !within_limit {
        return Ok(None);
    }

    let basetime = invoice.recurrence_basetime.ok_or_else(|| {
        OffersError::bad_invoice(
            "recurrence_basetime",
            "missing for a recurring invoice_request",
        )
    })?;

    recurrence::next_period(
        basetime,
        recurrence,
        invreq.recurrence_start,
        completed_counter,
        offer.recurrence_paywindow,
    )
    .map(Some)
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use bitcoin::secp256k1::{schnorr, KeyPair, PublicKey, SecretKey};
    use common::rng::SysRng;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        capabilities::{
            GossipNode, OfferRecord, OfferStatus, OnionMessageSend,
            PaymentRecord, Route,
        },
        fields::{Recurrence, RecurrencePeriodKind},
        offer::OfferBuilder,
    };

    fn keypair(secp: &Secp256k1<secp256k1::All>, byte: u8) -> KeyPair {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        KeyPair::from_secret_key(secp, sk)
    }

    /// Stands in for the real signer, which owns the payer-base secret key
    /// and applies the scalar-side tweak itself (§4.3: "the core never sees
    /// the secret"). `sign_bolt12` is only ever called here for
    /// `recurrence_signature` (the S5 recurrence scenario), which must
    /// verify against the *tweaked* `payer_key`
    /// ([`crate::keys::PayerKeyDeriver::rederive`]), so this fake has to
    /// re-derive the same tweaked secret rather than sign with the bare
    /// base key.
    struct FakeSigner {
        base_keypair: KeyPair,
    }

    #[async_trait]
    impl Signer for FakeSigner {
        async fn sign_bolt12(
            &self,
            message_name: &str,
            field_name: &str,
            merkle_root: [u8; 32],
            payer_info: Option<&[u8]>,
        ) -> Result<schnorr::Signature, FatalError> {
            let secp = Secp256k1::new();
            let payer_info = payer_info
                .expect("recurrence_signature signing always carries payer_info");
            let tweak_input = common::sha256::digest_many(&[
                &self.base_keypair.public_key().serialize(),
                payer_info,
            ]);
            let scalar = secp256k1::Scalar::from_be_bytes(
                tweak_input.as_ref().try_into().expect("sha256 is 32 bytes"),
            )
            .expect("payer key tweak landed on an invalid scalar");
            let base_secret =
                SecretKey::from_slice(&self.base_keypair.secret_bytes())
                    .expect("keypair's secret bytes are a valid secret key");
            let tweaked_secret = base_secret
                .add_tweak(&scalar)
                .expect("payer key tweak landed on an invalid point");
            let tweaked_keypair =
                KeyPair::from_secret_key(&secp, tweaked_secret);
            Ok(crate::signature::sign(
                &secp,
                message_name,
                field_name,
                merkle_root,
                &tweaked_keypair,
                &[0x5a; 32],
            ))
        }

        async fn payer_base_pubkey(&self) -> Result<PublicKey, FatalError> {
            Ok(self.base_keypair.public_key())
        }
    }

    /// Decodes the real outbound `invoice_request` it's handed and builds its
    /// reply from that -- rather than from a separately pre-computed
    /// request -- since [`PayerKeyDeriver::derive`] mints fresh random
    /// `payer_info` on every call, so a request built out-of-band would
    /// carry a different `payer_key`/`payer_info` than whatever the engine
    /// actually sent.
    struct FakeTransport {
        tx: mpsc::UnboundedSender<(XOnlyPublicKey, InboundPayload)>,
        reply: Box<dyn Fn(InvoiceRequest) -> InboundPayload + Send + Sync>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_onion_message(
            &self,
            send: OnionMessageSend,
        ) -> Result<(), FatalError> {
            let blinding = PublicKey::from_slice(&send.reply_path.blinding)
                .unwrap()
                .x_only_public_key()
                .0;
            let stream = TlvStream::decode(&send.payload)
                .expect("engine emits a well-formed invoice_request");
            let invreq = InvoiceRequest::from_tlv(&stream)
                .expect("engine emits a valid invoice_request");
            self.tx.send((blinding, (self.reply)(invreq))).ok();
            Ok(())
        }
    }

    /// A transport that never replies, for exercising the deadline path.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send_onion_message(
            &self,
            _send: OnionMessageSend,
        ) -> Result<(), FatalError> {
            Ok(())
        }
    }

    struct FakeGossip {
        dest: NodePk,
    }

    #[async_trait]
    impl Gossip for FakeGossip {
        async fn lookup(&self, node_id: &NodePk) -> Option<GossipNode> {
            (*node_id == self.dest).then(|| GossipNode {
                node_id: *node_id,
                supports_onion_messages: true,
            })
        }

        async fn dijkstra(
            &self,
            _self_id: &NodePk,
            to: &NodePk,
            _feature_bit: usize,
        ) -> Option<Route> {
            (*to == self.dest).then(|| Route {
                hops: vec![*to],
            })
        }

        async fn node_supports(&self, _node: &NodePk, _feature_bit: usize) -> bool {
            true
        }

        async fn refresh(&self) {}
    }

    #[derive(Default)]
    struct FakeWallet {
        payments: Mutex<Vec<PaymentRecord>>,
    }

    #[async_trait]
    impl Wallet for FakeWallet {
        async fn create_offer(
            &self,
            _record: OfferRecord,
        ) -> Result<(), OffersError> {
            unimplemented!()
        }
        async fn find_offer(&self, _offer_id: &[u8; 32]) -> Option<OfferRecord> {
            None
        }
        async fn list_offers(&self) -> Vec<OfferRecord> {
            vec![]
        }
        async fn disable_offer(
            &self,
            _offer_id: &[u8; 32],
        ) -> Result<OfferStatus, OffersError> {
            unimplemented!()
        }
        async fn list_payments_by_label(
            &self,
            label: &str,
        ) -> Vec<PaymentRecord> {
            self.payments
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.label == label)
                .cloned()
                .collect()
        }
    }

    struct TestRig {
        engine: Engine,
        offer: Offer,
        dest_id: NodePk,
    }

    /// Build a test rig whose [`FakeTransport`] replies to whatever
    /// `invoice_request` the engine actually sends, per `make_reply`.
    fn build_rig(
        recurrence: Option<(Recurrence, u8, u64)>,
        make_reply: impl Fn(&Offer, &KeyPair, InvoiceRequest) -> InboundPayload
            + Send
            + Sync
            + 'static,
    ) -> (TestRig, mpsc::UnboundedReceiver<(XOnlyPublicKey, InboundPayload)>)
    {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let dest_sk = SecretKey::from_slice(&[0x01; 32]).unwrap();
        let dest_id = NodePk(PublicKey::from_secret_key(&secp, &dest_sk));

        let mut builder = OfferBuilder::new(node_id, "coffee".to_string())
            .amount_msat(1_000);
        if let Some((r, start_any_period, basetime)) = recurrence {
            builder = builder.recurrence(
                r,
                crate::fields::RecurrenceBase {
                    start_any_period,
                    basetime,
                },
            );
        }
        let offer = builder.build(&secp, &node_kp, &[1; 32]).unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer: Arc<dyn Signer> = Arc::new(FakeSigner {
            base_keypair: base_kp,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let reply_offer = offer.clone();
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport {
            tx,
            reply: Box::new(move |invreq| {
                make_reply(&reply_offer, &node_kp, invreq)
            }),
        });
        let gossip: Arc<dyn Gossip> = Arc::new(FakeGossip { dest: dest_id });
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::default());

        let self_sk = SecretKey::from_slice(&[0x03; 32]).unwrap();
        let self_id = NodePk(PublicKey::from_secret_key(&secp, &self_sk));

        let engine = Engine::new(
            secp,
            EngineConfig::default(),
            self_id,
            signer,
            transport,
            gossip,
            wallet,
            deriver,
        );

        (
            TestRig {
                engine,
                offer,
                dest_id,
            },
            rx,
        )
    }

    fn invoice_for(
        offer: &Offer,
        invreq: &InvoiceRequest,
        node_kp: &KeyPair,
        amount_msat: u64,
        description: Option<&str>,
    ) -> Invoice {
        let secp = Secp256k1::new();
        let mut invoice = Invoice {
            offer_id: invreq.offer_id,
            payer_key: invreq.payer_key,
            payer_info: invreq.payer_info.clone(),
            quantity: invreq.quantity,
            recurrence_counter: invreq.recurrence_counter,
            recurrence_start: invreq.recurrence_start,
            node_id: offer.node_id.unwrap(),
            description: description.map(|s| s.to_string()),
            vendor: offer.vendor.clone(),
            amount_msat,
            created_at: 1_700_000_000,
            relative_expiry: Some(3600),
            payment_hash: [0x42; 32],
            min_final_cltv_expiry: Some(18),
            fallbacks: vec![],
            blinded_paths: vec![],
            recurrence_basetime: offer
                .recurrence_base
                .map(|b| b.basetime),
            signature: None,
        };
        let root = invoice.merkle_root().unwrap();
        invoice.signature = Some(crate::signature::sign(
            &secp,
            "invoice",
            "signature",
            root,
            node_kp,
            &[0x77; 32],
        ));
        invoice
    }

    #[tokio::test]
    async fn s1_fixed_amount_happy_path() {
        let (rig, mut rx) = build_rig(None, |offer, node_kp, invreq| {
            InboundPayload::Invoice(
                invoice_for(offer, &invreq, node_kp, 1_000, None)
                    .to_tlv()
                    .encode(),
            )
        });
        let engine = Arc::new(rig.engine);
        let engine2 = engine.clone();
        tokio::spawn(async move {
            if let Some((blinding, payload)) = rx.recv().await {
                engine2.on_onion_message(blinding, payload).await;
            }
        });

        let mut rng = SysRng::new();
        let outcome = engine
            .fetch_invoice(&mut rng, rig.offer, RequestParams::default(), 0)
            .await
            .unwrap();

        assert!(outcome.changes.description.is_none());
        assert!(outcome.changes.vendor.is_none());
        assert!(outcome.changes.msat.is_none());
        assert!(outcome.next_period.is_none());
    }

    #[tokio::test]
    async fn s2_amount_mismatch_surfaces_as_change() {
        let (rig, mut rx) = build_rig(None, |offer, node_kp, invreq| {
            InboundPayload::Invoice(
                invoice_for(offer, &invreq, node_kp, 1_500, None)
                    .to_tlv()
                    .encode(),
            )
        });
        let engine = Arc::new(rig.engine);
        let engine2 = engine.clone();
        tokio::spawn(async move {
            if let Some((blinding, payload)) = rx.recv().await {
                engine2.on_onion_message(blinding, payload).await;
            }
        });

        let mut rng = SysRng::new();
        let outcome = engine
            .fetch_invoice(&mut rng, rig.offer, RequestParams::default(), 0)
            .await
            .unwrap();

        assert_eq!(outcome.changes.msat, Some(1_500));
    }

    #[tokio::test]
    async fn s3_description_appended() {
        let (rig, mut rx) = build_rig(None, |offer, node_kp, invreq| {
            InboundPayload::Invoice(
                invoice_for(
                    offer,
                    &invreq,
                    node_kp,
                    1_000,
                    Some("coffee (decaf)"),
                )
                .to_tlv()
                .encode(),
            )
        });
        let engine = Arc::new(rig.engine);
        let engine2 = engine.clone();
        tokio::spawn(async move {
            if let Some((blinding, payload)) = rx.recv().await {
                engine2.on_onion_message(blinding, payload).await;
            }
        });

        let mut rng = SysRng::new();
        let outcome = engine
            .fetch_invoice(&mut rng, rig.offer, RequestParams::default(), 0)
            .await
            .unwrap();

        assert_eq!(
            outcome.changes.description,
            Some(DescriptionChange::Appended(" (decaf)".to_string()))
        );
    }

    #[tokio::test]
    async fn s4_bad_invoice_signature_fails() {
        let (rig, mut rx) = build_rig(None, |offer, node_kp, invreq| {
            let mut invoice = invoice_for(offer, &invreq, node_kp, 1_000, None);
            // Flip a bit in the signature.
            let mut sig_bytes = invoice.signature.unwrap().as_ref().to_vec();
            sig_bytes[0] ^= 0xff;
            invoice.signature =
                Some(schnorr::Signature::from_slice(&sig_bytes).unwrap());
            InboundPayload::Invoice(invoice.to_tlv().encode())
        });
        let engine = Arc::new(rig.engine);
        let engine2 = engine.clone();
        tokio::spawn(async move {
            if let Some((blinding, payload)) = rx.recv().await {
                engine2.on_onion_message(blinding, payload).await;
            }
        });

        let mut rng = SysRng::new();
        let err = engine
            .fetch_invoice(&mut rng, rig.offer, RequestParams::default(), 0)
            .await
            .unwrap_err();

        match err {
            EngineError::Invalid(e) => {
                assert_eq!(e.kind, OffersErrorKind::OfferBadInvreqReply);
                assert!(e.msg.contains("signature"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s5_recurrence_second_period() {
        let recurrence = Recurrence {
            period_kind: RecurrencePeriodKind::Days,
            period_count: 30,
        };
        let (rig, mut rx) = build_rig(
            Some((recurrence, 0, 1_600_000_000)),
            |offer, node_kp, invreq| {
                InboundPayload::Invoice(
                    invoice_for(offer, &invreq, node_kp, 1_000, None)
                        .to_tlv()
                        .encode(),
                )
            },
        );
        let engine = Arc::new(rig.engine);
        let engine2 = engine.clone();
        tokio::spawn(async move {
            if let Some((blinding, payload)) = rx.recv().await {
                engine2.on_onion_message(blinding, payload).await;
            }
        });

        let params = RequestParams {
            recurrence_counter: Some(0),
            recurrence_label: Some("sub".to_string()),
            ..Default::default()
        };
        let mut rng = SysRng::new();
        let outcome = engine
            .fetch_invoice(&mut rng, rig.offer, params, 0)
            .await
            .unwrap();

        let period = outcome.next_period.unwrap();
        assert_eq!(period.counter, 1);
        assert_eq!(period.starttime, 1_600_000_000 + 30 * 86_400);
        assert_eq!(period.endtime, 1_600_000_000 + 60 * 86_400 - 1);
    }

    #[tokio::test]
    async fn s6_missing_prior_payment_fails_before_send() {
        let recurrence = Recurrence {
            period_kind: RecurrencePeriodKind::Days,
            period_count: 30,
        };
        let (rig, _rx) = build_rig(
            Some((recurrence, 0, 1_600_000_000)),
            |offer, node_kp, invreq| {
                InboundPayload::Invoice(
                    invoice_for(offer, &invreq, node_kp, 1_000, None)
                        .to_tlv()
                        .encode(),
                )
            },
        );
        let engine = rig.engine;
        let params = RequestParams {
            recurrence_counter: Some(1),
            recurrence_label: Some("sub".to_string()),
            ..Default::default()
        };

        let mut rng = SysRng::new();
        let err = engine
            .fetch_invoice(&mut rng, rig.offer, params, 0)
            .await
            .unwrap_err();

        match err {
            EngineError::Invalid(e) => assert!(
                e.msg.contains("No previous payment attempted")
            ),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_elapses_without_reply() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let dest_sk = SecretKey::from_slice(&[0x01; 32]).unwrap();
        let dest_id = NodePk(PublicKey::from_secret_key(&secp, &dest_sk));
        let offer = OfferBuilder::new(node_id, "coffee".to_string())
            .amount_msat(1_000)
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer: Arc<dyn Signer> = Arc::new(FakeSigner {
            base_keypair: base_kp,
        });
        let transport: Arc<dyn Transport> = Arc::new(SilentTransport);
        let gossip: Arc<dyn Gossip> = Arc::new(FakeGossip { dest: dest_id });
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::default());
        let self_sk = SecretKey::from_slice(&[0x03; 32]).unwrap();
        let self_id = NodePk(PublicKey::from_secret_key(&secp, &self_sk));

        let engine = Engine::new(
            secp,
            EngineConfig {
                request_deadline: Duration::from_millis(20),
                features: vec![],
            },
            self_id,
            signer,
            transport,
            gossip,
            wallet,
            deriver,
        );

        let mut rng = SysRng::new();
        let err = engine
            .fetch_invoice(&mut rng, offer, RequestParams::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout));
        assert!(engine.outstanding.lock().unwrap().is_empty());
    }
}
