//! Blinded path types shared by the `invoice` wire codec ([`crate::invoice`])
//! and the reply-path construction in [`crate::router`] (C6).
//!
//! A blinded path hides the real node identities of every hop but the
//! introduction point from whoever's holding the path, while still letting
//! an onion-message (or payment) be routed through them. We model only the
//! shape BOLT-12 needs here: the full onion-blinding cryptography (computing
//! each hop's `enctlv` payload) lives in [`crate::router`], since that's
//! where the engine actually builds reply paths; this module just carries
//! the resulting data so it can ride inside a TLV stream.

use crate::{
    error::{OffersError, OffersErrorKind},
    tlv::{read_bigsize, write_bigsize},
};

/// One hop of a blinded path: a blinded node id plus an opaque payload
/// (`enctlv`) only that hop's real node can decrypt to learn the next hop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlindedHop {
    pub blinded_node_id: [u8; 33],
    pub encrypted_payload: Vec<u8>,
}

/// A full blinded path: an (unblinded) introduction node, the blinding
/// point the introduction node uses to unwind the blinding, and the blinded
/// hops after it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlindedPath {
    pub introduction_node: [u8; 33],
    pub blinding: [u8; 33],
    pub hops: Vec<BlindedHop>,
}

fn parse_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::ParseError, msg)
}

impl BlindedPath {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.introduction_node);
        out.extend_from_slice(&self.blinding);
        write_bigsize(out, self.hops.len() as u64);
        for hop in &self.hops {
            out.extend_from_slice(&hop.blinded_node_id);
            write_bigsize(out, hop.encrypted_payload.len() as u64);
            out.extend_from_slice(&hop.encrypted_payload);
        }
    }

    fn decode_from(cursor: &mut std::io::Cursor<&[u8]>) -> Result<Self, OffersError> {
        use std::io::Read;

        let mut introduction_node = [0u8; 33];
        cursor
            .read_exact(&mut introduction_node)
            .map_err(|_| parse_err("truncated blinded path introduction_node"))?;
        let mut blinding = [0u8; 33];
        cursor
            .read_exact(&mut blinding)
            .map_err(|_| parse_err("truncated blinded path blinding point"))?;
        let num_hops = read_bigsize(cursor)?;
        let mut hops = Vec::with_capacity(num_hops as usize);
        for _ in 0..num_hops {
            let mut blinded_node_id = [0u8; 33];
            cursor
                .read_exact(&mut blinded_node_id)
                .map_err(|_| parse_err("truncated blinded hop node id"))?;
            let len = read_bigsize(cursor)?;
            let mut payload = vec![0u8; len as usize];
            cursor
                .read_exact(&mut payload)
                .map_err(|_| parse_err("truncated blinded hop payload"))?;
            hops.push(BlindedHop {
                blinded_node_id,
                encrypted_payload: payload,
            });
        }
        Ok(Self {
            introduction_node,
            blinding,
            hops,
        })
    }
}

/// Encode a whole `invoice_blinded_paths` field value: a back-to-back list
/// of length-prefixed [`BlindedPath`] records.
pub fn encode_paths(paths: &[BlindedPath]) -> Vec<u8> {
    let mut out = Vec::new();
    for path in paths {
        let mut buf = Vec::new();
        path.encode_to(&mut buf);
        write_bigsize(&mut out, buf.len() as u64);
        out.extend_from_slice(&buf);
    }
    out
}

pub fn decode_paths(value: &[u8]) -> Result<Vec<BlindedPath>, OffersError> {
    let mut cursor = std::io::Cursor::new(value);
    let mut paths = Vec::new();
    while (cursor.position() as usize) < value.len() {
        let len = read_bigsize(&mut cursor)?;
        let start = cursor.position() as usize;
        let end = start + len as usize;
        if end > value.len() {
            return Err(parse_err("truncated blinded path record"));
        }
        let mut sub = std::io::Cursor::new(&value[start..end]);
        paths.push(BlindedPath::decode_from(&mut sub)?);
        cursor.set_position(end as u64);
    }
    Ok(paths)
}
