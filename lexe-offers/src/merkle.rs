//! BOLT-12 merkle root computation over a TLV stream's fields.
//!
//! Each field is hashed twice -- once "nonced" against the record's first TLV
//! (so that two records which happen to share a field's raw bytes don't also
//! share a leaf hash) and once plain -- and the two leaves are combined into
//! one. The combined leaves are then folded pairwise, carrying an odd
//! leftover to the next level, until a single root remains.
//!
//! This is the BOLT-12 "SHA-256 merkle tree" used to compute `offer_id` and
//! the digest that [`crate::signature`] ultimately signs.

use common::sha256;

use crate::tlv::{write_bigsize, TlvStream};

const TAG_LEAF: &[u8] = b"LnLeaf";
const TAG_NONCE: &[u8] = b"LnNonce";
const TAG_BRANCH: &[u8] = b"LnBranch";

/// The wire type of the record's very first TLV field, used to domain
/// separate the per-field "nonce" leaf across different message kinds (an
/// `offer`'s first field is never a valid `invoice`'s first field, etc).
///
/// BOLT-12 fixes this to the first field actually present on the wire, which
/// in practice is always the lowest-numbered field defined for that message
/// kind (`offer_chains`=2, `invreq_metadata`=0, `invoice_paths`=160, ...).
/// Signature-bearing fields are excluded from the merkle computation
/// entirely, so they never end up as the "first TLV" either.
fn first_tlv_record(stream: &TlvStream) -> Option<Vec<u8>> {
    let field = stream.iter().next()?;
    let mut out = Vec::new();
    write_bigsize(&mut out, field.ty);
    write_bigsize(&mut out, field.value.len() as u64);
    out.extend_from_slice(&field.value);
    Some(out)
}

/// Per BOLT-12 convention, types >= 240 carry a signature and are excluded
/// from the merkle computation (a signature can't very well sign over
/// itself).
pub fn is_signature_field(ty: u64) -> bool {
    ty >= 240
}

/// Sort two 32-byte hashes lexicographically and concatenate them. The
/// combining step at every level of the tree uses this, which is what makes
/// the final root insensitive to the order fields were *inserted* in (only
/// their ascending wire order, which [`TlvStream`] already enforces,
/// matters).
fn sort2(a: [u8; 32], b: [u8; 32]) -> [u8; 64] {
    let mut out = [0u8; 64];
    if a <= b {
        out[..32].copy_from_slice(&a);
        out[32..].copy_from_slice(&b);
    } else {
        out[..32].copy_from_slice(&b);
        out[32..].copy_from_slice(&a);
    }
    out
}

fn branch(a: [u8; 32], b: [u8; 32]) -> [u8; 32] {
    sha256::tagged(TAG_BRANCH, &sort2(a, b))
}

/// Compute the merkle root over every non-signature field of `stream`.
///
/// Returns `None` if `stream` has no non-signature fields -- an empty
/// message can't have a meaningful merkle root, and callers (`offer_id`
/// computation, signing) should treat that as a malformed record rather than
/// hash an empty tree.
pub fn merkle_root(stream: &TlvStream) -> Option<[u8; 32]> {
    let first_tlv = first_tlv_record(stream)?;

    let mut leaves: Vec<[u8; 32]> = stream
        .iter()
        .filter(|field| !is_signature_field(field.ty))
        .map(|field| {
            let mut field_bytes = Vec::new();
            write_bigsize(&mut field_bytes, field.ty);
            write_bigsize(&mut field_bytes, field.value.len() as u64);
            field_bytes.extend_from_slice(&field.value);

            let nonce_leaf = sha256::tagged_many(
                TAG_NONCE,
                &[first_tlv.as_slice(), field_bytes.as_slice()],
            );
            let value_leaf = sha256::tagged(TAG_LEAF, &field_bytes);
            branch(nonce_leaf, value_leaf)
        })
        .collect();

    if leaves.is_empty() {
        return None;
    }

    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        let mut pairs = leaves.chunks_exact(2);
        for pair in &mut pairs {
            next.push(branch(pair[0], pair[1]));
        }
        if let [leftover] = pairs.remainder() {
            next.push(*leftover);
        }
        leaves = next;
    }

    Some(leaves[0])
}

#[cfg(test)]
mod test {
    use super::*;

    fn stream_with(fields: &[(u64, &[u8])]) -> TlvStream {
        let mut s = TlvStream::new();
        for &(ty, val) in fields {
            s.insert(ty, val.to_vec());
        }
        s
    }

    #[test]
    fn empty_stream_has_no_root() {
        assert_eq!(merkle_root(&TlvStream::new()), None);
    }

    #[test]
    fn root_excludes_signature_fields() {
        let with_sig =
            stream_with(&[(2, b"a"), (4, b"b"), (240, &[0u8; 64])]);
        let without_sig = stream_with(&[(2, b"a"), (4, b"b")]);
        assert_eq!(merkle_root(&with_sig), merkle_root(&without_sig));
    }

    #[test]
    fn root_is_stable_under_insertion_order() {
        // `TlvStream` is keyed by type, so insertion order can't actually
        // affect the wire order, but re-derive the root from two streams
        // built in opposite insertion order as a sanity check anyway.
        let a = stream_with(&[(2, b"a"), (4, b"b"), (6, b"c")]);
        let b = stream_with(&[(6, b"c"), (2, b"a"), (4, b"b")]);
        assert_eq!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn mutating_a_field_changes_the_root() {
        let a = stream_with(&[(2, b"a"), (4, b"b")]);
        let b = stream_with(&[(2, b"a"), (4, b"B")]);
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn odd_leaf_count_carries_unpaired_leaf() {
        let three = stream_with(&[(2, b"a"), (4, b"b"), (6, b"c")]);
        assert!(merkle_root(&three).is_some());
    }
}
