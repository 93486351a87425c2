//! `lexe-offers` implements the core of a BOLT-12 "offers" subsystem: the
//! creation, signing, transport, and validation of the `offer`,
//! `invoice_request`, and `invoice` TLV messages, and the state machine
//! (component C7, [`engine`]) that drives a merchant-signed offer to a
//! validated invoice over a blinded onion-message round trip.
//!
//! Module map (component numbering from the design doc):
//!
//! - [`tlv`], [`merkle`], [`wire`], [`fields`] -- C1, the TLV codec and
//!   merkle-root computation shared by every message kind.
//! - [`signature`] -- C2, BIP-340 Schnorr sign/verify over a
//!   domain-separated digest of a record's merkle root.
//! - [`keys`] -- C3, payer-key derivation (the public side of the tweak;
//!   the secret side lives in the [`capabilities::Signer`] collaborator).
//! - [`offer`], [`manager`] -- C4, the offer data model/codec and the
//!   policy wrapped around it (decode, verify, persist).
//! - [`invoice_request`], [`request_builder`] -- C5, the invoice_request
//!   data model/codec and the rules for building one from an offer.
//! - [`router`], [`blinded_path`] -- C6, pathfinding over the gossip
//!   oracle and blinded reply-path construction.
//! - [`invoice`], [`recurrence`], [`engine`] -- C7, the invoice data
//!   model/codec, recurrence period arithmetic, and the exchange engine
//!   itself.
//! - [`capabilities`] -- the `Signer`/`Transport`/`Gossip`/`Wallet`
//!   collaborator interfaces the engine is generic over.
//! - [`error`] -- the crate's stable error taxonomy.
//! - [`bech32`] -- BOLT-12's checksum-less bech32 variant used by offer
//!   string encode/decode.

pub mod bech32;
pub mod blinded_path;
pub mod capabilities;
pub mod engine;
pub mod error;
pub mod fields;
pub mod invoice;
pub mod invoice_request;
pub mod keys;
pub mod manager;
pub mod merkle;
pub mod offer;
pub mod recurrence;
pub mod request_builder;
pub mod router;
pub mod signature;
pub mod tlv;
pub mod wire;
