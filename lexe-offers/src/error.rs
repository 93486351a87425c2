//! The error taxonomy for the offers engine.
//!
//! Every fallible operation returns an [`OffersError`], a `{kind, msg}` pair
//! in the same shape as `common`'s API errors: a small, stable, `#[repr(u16)]`
//! [`OffersErrorKind`] that downstream callers (e.g. a JSON-RPC dispatcher)
//! can match on or map to an exit code, plus a human-readable `msg` that
//! names the offending field for debugging.

use std::fmt;

use thiserror::Error;

/// The top-level error type returned by every fallible operation in this
/// crate.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind}: {msg}")]
pub struct OffersError {
    pub kind: OffersErrorKind,
    pub msg: String,
}

impl OffersError {
    pub fn new(kind: OffersErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    /// Construct an [`OffersErrorKind::OfferBadInvreqReply`] naming the
    /// offending invoice field.
    pub fn bad_invoice(field: &'static str, why: impl fmt::Display) -> Self {
        Self::new(
            OffersErrorKind::OfferBadInvreqReply,
            format!("invoice field `{field}` invalid: {why}"),
        )
    }
}

/// Stable, numeric error codes.
///
/// These are intentionally a flat list rather than a nested enum-of-enums:
/// external callers (e.g. a JSON-RPC layer) only ever need to match on this
/// one value, and the numeric discriminants are part of the wire contract --
/// do not renumber existing variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum OffersErrorKind {
    /// Malformed bech32, malformed TLV, unknown even field, or a missing
    /// required field.
    ParseError = 1,
    /// An amount/quantity/recurrence field was present when forbidden, or
    /// absent when required.
    SemanticError = 2,
    /// A signature failed to verify, a payer-key tweak landed on an invalid
    /// point, or an unrecognized chain was requested.
    CryptoError = 3,
    /// The destination is not in the gossip map, or no route to it exists.
    RoutingError = 4,
    /// The returned invoice failed a BOLT-12 invariant, or the peer replied
    /// with an `invoice_error`.
    ProtocolError = 5,
    /// The request's deadline elapsed with no reply.
    Timeout = 6,

    // --- stable, user-facing exit codes named in the external interface --- //
    OfferAlreadyExists = 100,
    OfferAlreadyDisabled = 101,
    OfferExpired = 102,
    OfferRouteNotFound = 103,
    OfferBadInvreqReply = 104,
    JsonRpcInvalidParams = 105,
}

impl fmt::Display for OffersErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParseError => "PARSE_ERROR",
            Self::SemanticError => "SEMANTIC_ERROR",
            Self::CryptoError => "CRYPTO_ERROR",
            Self::RoutingError => "ROUTING_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::OfferAlreadyExists => "OFFER_ALREADY_EXISTS",
            Self::OfferAlreadyDisabled => "OFFER_ALREADY_DISABLED",
            Self::OfferExpired => "OFFER_EXPIRED",
            Self::OfferRouteNotFound => "OFFER_ROUTE_NOT_FOUND",
            Self::OfferBadInvreqReply => "OFFER_BAD_INVREQ_REPLY",
            Self::JsonRpcInvalidParams => "JSONRPC_INVALID_PARAMS",
        };
        f.write_str(s)
    }
}

/// Fatal errors: the signer or transport collaborator is unreachable.
///
/// Unlike [`OffersError`], there is no graceful recovery path for these --
/// they propagate up and abort the process, so they don't carry a stable
/// error code.
#[derive(Debug, Error)]
#[error("fatal: {0} collaborator unreachable: {1}")]
pub struct FatalError(pub &'static str, pub anyhow::Error);

pub type Result<T> = std::result::Result<T, OffersError>;
