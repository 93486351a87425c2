//! Offer manager (component C4): decode/verify offers off the wire, and the
//! policy glue around the wallet's offer-persistence table.
//!
//! [`crate::offer`] owns the bare data model and TLV codec; this module owns
//! everything that makes an offer *actionable* -- the BOLT-12 presence
//! invariants, signature verification, and the status-transition rules
//! around `create`/`list`/`disable`.

use bitcoin::secp256k1::{self, KeyPair, Secp256k1};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    capabilities::{OfferRecord, OfferStatus, Wallet},
    error::{FatalError, OffersError, OffersErrorKind},
    offer::Offer,
};

fn sem_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::SemanticError, msg)
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Invalid(#[from] OffersError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Decode a bech32 offer string and enforce the "actionable" invariants
/// (§4.4): `node_id`/`description`/`signature` all present, and the
/// signature actually verifies against `node_id`.
///
/// `send_invoice` offers decode successfully here -- they're only rejected
/// downstream, by [`crate::request_builder::build`], since a send-invoice
/// offer is perfectly legitimate to *look at* (list, display), just not to
/// fetch an invoice against.
pub fn decode_offer(
    secp: &Secp256k1<impl secp256k1::Verification>,
    bolt12: &str,
) -> Result<Offer, OffersError> {
    let offer = Offer::decode_str(bolt12)?;

    if offer.node_id.is_none() {
        return Err(sem_err("offer missing required field `node_id`"));
    }
    if offer.description.is_none() {
        return Err(sem_err("offer missing required field `description`"));
    }
    if offer.signature.is_none() {
        return Err(sem_err("offer missing required field `signature`"));
    }
    offer.verify_signature(secp)?;

    Ok(offer)
}

/// Build, sign, and persist a new offer under `label`, per the user-visible
/// `create_offer` operation.
///
/// Idempotent: we check the wallet for an existing record at this
/// `offer_id` before inserting, and surface a pre-existing record as
/// [`OffersErrorKind::OfferAlreadyExists`] rather than relying on the
/// wallet's own duplicate handling, since the wallet interface doesn't
/// otherwise distinguish "already there" from any other write failure.
pub async fn create_offer<R: common::rng::Crng>(
    secp: &Secp256k1<secp256k1::All>,
    rng: &mut R,
    wallet: &dyn Wallet,
    node_keypair: &KeyPair,
    mut offer: Offer,
    label: Option<String>,
    single_use: bool,
) -> Result<OfferRecord, ManagerError> {
    let root = crate::merkle::merkle_root(&offer.to_tlv())
        .ok_or_else(|| sem_err("offer has no fields to hash"))?;
    let mut aux_rand = [0u8; 32];
    rng.fill_bytes(&mut aux_rand);
    let sig = crate::signature::sign(
        secp,
        "offer",
        "signature",
        root,
        node_keypair,
        &aux_rand,
    );
    offer.signature = Some(sig);

    let offer_id = offer.offer_id()?;

    if wallet.find_offer(&offer_id).await.is_some() {
        warn!(offer_id = %hex_fmt(&offer_id), "offer already exists");
        return Err(OffersError::new(
            OffersErrorKind::OfferAlreadyExists,
            "an offer with this id already exists",
        )
        .into());
    }

    let status = if single_use {
        OfferStatus::SingleUse
    } else {
        OfferStatus::MultiUse
    };
    let record = OfferRecord {
        offer_id,
        bolt12: offer.encode_str(),
        label,
        status,
    };

    wallet.create_offer(record.clone()).await?;
    info!(offer_id = %hex_fmt(&offer_id), "offer created");

    Ok(record)
}

/// Parameters for the user-visible `list_offers` operation.
#[derive(Clone, Debug, Default)]
pub struct ListOffersParams {
    pub offer_id: Option<[u8; 32]>,
    pub active_only: bool,
}

pub async fn list_offers(
    wallet: &dyn Wallet,
    params: ListOffersParams,
) -> Vec<OfferRecord> {
    wallet
        .list_offers()
        .await
        .into_iter()
        .filter(|r| params.offer_id.map_or(true, |id| id == r.offer_id))
        .filter(|r| !params.active_only || !r.status.is_disabled())
        .collect()
}

/// Disable an offer, per §4.4's transition rules: idempotent if already
/// disabled; fails [`OffersErrorKind::OfferAlreadyDisabled`] if the offer is
/// `Used` -- a used single-use offer was already consumed and can never be
/// un-consumed by disabling, so we treat that as a terminal "already
/// disabled"-shaped error rather than silently flipping its status.
pub async fn disable_offer(
    wallet: &dyn Wallet,
    offer_id: &[u8; 32],
) -> Result<OfferStatus, OffersError> {
    let record = wallet.find_offer(offer_id).await.ok_or_else(|| {
        OffersError::new(OffersErrorKind::ParseError, "unknown offer_id")
    })?;

    match record.status {
        OfferStatus::Used => Err(OffersError::new(
            OffersErrorKind::OfferAlreadyDisabled,
            "offer has already been used and cannot be disabled",
        )),
        OfferStatus::SingleDisabled | OfferStatus::MultiDisabled => {
            Ok(record.status)
        }
        OfferStatus::SingleUse | OfferStatus::MultiUse => {
            let status = wallet.disable_offer(offer_id).await?;
            info!(offer_id = %hex_fmt(offer_id), "offer disabled");
            Ok(status)
        }
    }
}

fn hex_fmt(bytes: &[u8; 32]) -> String {
    common::hex::display(bytes).to_string()
}
