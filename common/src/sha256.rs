//! A convenience module for hasing things with SHA-256.

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> ring::digest::Digest {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> ring::digest::Digest {
    let mut ctx = context();
    for input in inputs {
        ctx.update(input);
    }
    ctx.finish()
}

/// Create a SHA-256 digest context for manually hashing e.g. large input files.
pub fn context() -> ring::digest::Context {
    ring::digest::Context::new(&ring::digest::SHA256)
}

/// BIP-340 tagged hashing: `SHA256(SHA256(tag) || SHA256(tag) || msg)`.
///
/// Used to domain-separate the various hashes in the BOLT-12 offers
/// protocol (merkle leaves/branches, the final signature digest) so that a
/// hash computed for one purpose can never be replayed as if it were a hash
/// for another.
pub fn tagged(tag: &[u8], msg: &[u8]) -> [u8; 32] {
    let tag_hash = digest(tag);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest_many(&[tag_hash.as_ref(), tag_hash.as_ref(), msg]).as_ref());
    out
}

/// Same as [`tagged`], but hashes several message slices concatenated
/// together without allocating an intermediate buffer.
pub fn tagged_many(tag: &[u8], msgs: &[&[u8]]) -> [u8; 32] {
    let tag_hash = digest(tag);
    let mut inputs = Vec::with_capacity(msgs.len() + 2);
    inputs.push(tag_hash.as_ref());
    inputs.push(tag_hash.as_ref());
    inputs.extend_from_slice(msgs);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest_many(&inputs).as_ref());
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hex;

    // sanity check
    #[test]
    fn test_sha256() {
        let actual = hex::encode(digest(b"").as_ref());
        let expected =
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(&actual, expected);
    }
}

#[cfg(test)]
mod tagged_test {
    use super::*;

    #[test]
    fn tagged_matches_tagged_many() {
        let a = tagged(b"LnLeaf", b"hello world");
        let b = tagged_many(b"LnLeaf", &[b"hello ", b"world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn tagged_is_domain_separated() {
        let a = tagged(b"LnLeaf", b"same bytes");
        let b = tagged(b"LnNonce", b"same bytes");
        assert_ne!(a, b);
    }
}
