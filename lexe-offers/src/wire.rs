//! TLV type numbers shared by `offer`, `invoice_request`, and `invoice`
//! records.
//!
//! An `invoice_request` embeds the subset of its offer's fields that are
//! actually relevant to the request, and an `invoice` embeds the subset of
//! its `invoice_request`'s fields that carry over -- all three message kinds
//! share one flat type-number space so that (for example) `offer_node_id`
//! and `invoice_node_id` really are the same field, just appearing in
//! different records.
//!
//! All types below 240 are even (required-to-understand, BOLT-1 "it's ok to
//! be odd"); [`crate::merkle::is_signature_field`] treats every type >= 240
//! as a signature field excluded from the merkle computation.

pub const OFFER_CHAINS: u64 = 2;
pub const OFFER_CURRENCY: u64 = 6;
pub const OFFER_AMOUNT: u64 = 8;
pub const OFFER_DESCRIPTION: u64 = 10;
pub const OFFER_FEATURES: u64 = 12;
pub const OFFER_ABSOLUTE_EXPIRY: u64 = 14;
pub const OFFER_VENDOR: u64 = 20;
pub const OFFER_QUANTITY_MIN: u64 = 22;
pub const OFFER_QUANTITY_MAX: u64 = 24;
pub const OFFER_RECURRENCE: u64 = 26;
pub const OFFER_RECURRENCE_PAYWINDOW: u64 = 28;
pub const OFFER_RECURRENCE_LIMIT: u64 = 30;
pub const OFFER_RECURRENCE_BASE: u64 = 32;
pub const OFFER_SEND_INVOICE: u64 = 34;
pub const OFFER_NODE_ID: u64 = 36;

pub const INVREQ_OFFER_ID: u64 = 40;
pub const INVREQ_AMOUNT: u64 = 42;
pub const INVREQ_QUANTITY: u64 = 44;
pub const INVREQ_RECURRENCE_COUNTER: u64 = 46;
pub const INVREQ_RECURRENCE_START: u64 = 48;
pub const INVREQ_PAYER_KEY: u64 = 50;
pub const INVREQ_PAYER_INFO: u64 = 52;
pub const INVREQ_PAYER_NOTE: u64 = 54;

pub const INVOICE_AMOUNT: u64 = 60;
pub const INVOICE_CREATED_AT: u64 = 62;
pub const INVOICE_RELATIVE_EXPIRY: u64 = 64;
pub const INVOICE_PAYMENT_HASH: u64 = 66;
pub const INVOICE_MIN_FINAL_CLTV_EXPIRY: u64 = 68;
pub const INVOICE_FALLBACKS: u64 = 70;
pub const INVOICE_BLINDED_PATHS: u64 = 72;
pub const INVOICE_RECURRENCE_BASETIME: u64 = 74;

/// `invoice_error` fields, decoded best-effort by [`crate::engine`] -- BOLT-12
/// defines these as a small, separate TLV stream rather than a cousin of
/// `offer`/`invoice_request`/`invoice`, so they don't share this module's
/// merkle-bearing type-number space.
pub const INVOICE_ERROR_ERRONEOUS_FIELD: u64 = 1;
pub const INVOICE_ERROR_SUGGESTED_VALUE: u64 = 3;
pub const INVOICE_ERROR_MESSAGE: u64 = 5;

/// Shared by every message kind: a record's trailing signature, excluded
/// from its own merkle computation. `invoice_request` additionally uses
/// this slot for `recurrence_signature` when there's no final `invoice`
/// signature in the same stream (the two never coexist in one record).
pub const SIG_SIGNATURE: u64 = 240;
pub const SIG_RECURRENCE_SIGNATURE: u64 = 242;
