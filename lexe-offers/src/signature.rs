//! BOLT-12 signatures: BIP-340 Schnorr over a domain-separated digest of a
//! record's merkle root.
//!
//! The signed digest is `tagged("lightning" || 0x00 || message_name || 0x00
//! || field_name, merkle_root)`. Binding `message_name` and `field_name`
//! into the tag (rather than just signing the root directly) means a
//! signature collected for one field of one message kind can never be
//! replayed as a signature over a different field or message kind that
//! happens to share the same merkle root.

use bitcoin::secp256k1::{
    self, schnorr, KeyPair, Message, Secp256k1, XOnlyPublicKey,
};
use common::sha256;

/// Build the BIP-340 tagged-hash tag for `(message_name, field_name)`.
fn tag(message_name: &str, field_name: &str) -> Vec<u8> {
    let mut tag = Vec::with_capacity(
        b"lightning".len() + 1 + message_name.len() + 1 + field_name.len(),
    );
    tag.extend_from_slice(b"lightning");
    tag.push(0);
    tag.extend_from_slice(message_name.as_bytes());
    tag.push(0);
    tag.extend_from_slice(field_name.as_bytes());
    tag
}

/// Compute the 32-byte digest that gets signed/verified for
/// `(message_name, field_name, merkle_root)`.
pub fn sighash(
    message_name: &str,
    field_name: &str,
    merkle_root: [u8; 32],
) -> [u8; 32] {
    sha256::tagged(&tag(message_name, field_name), &merkle_root)
}

/// Sign `merkle_root` for `(message_name, field_name)` with `keypair`.
///
/// `aux_rand` is 32 bytes of fresh randomness mixed into the BIP-340 nonce
/// derivation as side-channel protection; it does not need to be secret or
/// reproducible, only unpredictable. Callers should draw it from a CSPRNG
/// per invocation.
pub fn sign(
    secp: &Secp256k1<secp256k1::All>,
    message_name: &str,
    field_name: &str,
    merkle_root: [u8; 32],
    keypair: &KeyPair,
    aux_rand: &[u8; 32],
) -> schnorr::Signature {
    let digest = sighash(message_name, field_name, merkle_root);
    let msg = Message::from_slice(&digest)
        .expect("sighash is always exactly 32 bytes");
    secp.sign_schnorr_with_aux_rand(&msg, keypair, aux_rand)
}

/// Verify `sig` over `merkle_root` for `(message_name, field_name)` against
/// `pubkey`. A signature produced over a record that was mutated after
/// signing (i.e. whose merkle root no longer matches) will fail here.
pub fn verify(
    secp: &Secp256k1<impl secp256k1::Verification>,
    message_name: &str,
    field_name: &str,
    merkle_root: [u8; 32],
    sig: &schnorr::Signature,
    pubkey: &XOnlyPublicKey,
) -> bool {
    let digest = sighash(message_name, field_name, merkle_root);
    let msg = match Message::from_slice(&digest) {
        Ok(msg) => msg,
        Err(_) => return false,
    };
    secp.verify_schnorr(sig, &msg, pubkey).is_ok()
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;

    use super::*;

    fn keypair(secp: &Secp256k1<secp256k1::All>, byte: u8) -> KeyPair {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        KeyPair::from_secret_key(secp, sk)
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let secp = Secp256k1::new();
        let kp = keypair(&secp, 0x11);
        let (xonly, _parity) = kp.x_only_public_key();
        let root = [0x42; 32];
        let aux = [0x01; 32];

        let sig = sign(&secp, "offer", "signature", root, &kp, &aux);
        assert!(verify(&secp, "offer", "signature", root, &sig, &xonly));
    }

    #[test]
    fn mutated_root_fails_verification() {
        let secp = Secp256k1::new();
        let kp = keypair(&secp, 0x22);
        let (xonly, _parity) = kp.x_only_public_key();
        let aux = [0x02; 32];

        let sig = sign(&secp, "offer", "signature", [0x01; 32], &kp, &aux);
        assert!(!verify(&secp, "offer", "signature", [0x02; 32], &sig, &xonly));
    }

    #[test]
    fn wrong_field_name_fails_verification() {
        let secp = Secp256k1::new();
        let kp = keypair(&secp, 0x33);
        let (xonly, _parity) = kp.x_only_public_key();
        let root = [0x07; 32];
        let aux = [0x03; 32];

        let sig =
            sign(&secp, "invoice_request", "signature", root, &kp, &aux);
        assert!(!verify(
            &secp,
            "invoice_request",
            "recurrence_signature",
            root,
            &sig,
            &xonly
        ));
    }
}
