//! Transport router (component C6): resolve a destination into a path via
//! the gossip oracle, then build a blinded reply path back to ourselves
//! along that path so the destination can answer asynchronously.
//!
//! Per the gossip collaborator's contract (§6), the graph traversal itself
//! -- Dijkstra over the onion-message-capable subgraph -- is the gossip
//! oracle's job: it holds the full network graph and can give a consistent
//! snapshot per call, where we only hold a thin capability handle. This
//! module's own work is everything *around* that call: resolving the
//! destination, mapping a miss to [`OffersErrorKind::RoutingError`], and
//! building the blinded reply path's onion-blinding cryptography, which has
//! nothing to do with the graph.

use bitcoin::secp256k1::{
    ecdh, PublicKey, Scalar, Secp256k1, SecretKey, XOnlyPublicKey,
};
use common::{ln::node::NodePk, rng::Crng, sha256};
use ring::aead;

use crate::{
    blinded_path::{BlindedHop, BlindedPath},
    capabilities::{Gossip, OnionMessageSend, Route, RouteHop, OPT_ONION_MESSAGES_FEATURE_BIT},
    error::{OffersError, OffersErrorKind},
};

fn route_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::RoutingError, msg)
}

/// Resolve `dest` to a route through onion-message-capable hops, per §4.6
/// steps 1-3.
pub async fn find_route(
    gossip: &dyn Gossip,
    self_id: &NodePk,
    dest: &NodePk,
) -> Result<Route, OffersError> {
    gossip
        .lookup(dest)
        .await
        .ok_or_else(|| route_err("unknown destination"))?;

    gossip
        .dijkstra(self_id, dest, OPT_ONION_MESSAGES_FEATURE_BIT)
        .await
        .ok_or_else(|| route_err("no route to destination"))
}

/// Derive the single-use ChaCha20-Poly1305 key for a hop's `enctlv` payload
/// from that hop's ECDH shared secret. Single-use per key lets us get away
/// with an all-zero nonce, same rationale as the rest of this crate's AEAD
/// usage: the key itself never repeats.
fn enctlv_key(shared_secret: &ecdh::SharedSecret) -> aead::LessSafeKey {
    let salt = ring::hkdf::Salt::new(ring::hkdf::HKDF_SHA256, b"enctlv");
    let prk = salt.extract(shared_secret.secret_bytes());
    let unbound = aead::UnboundKey::from(
        prk.expand(&[b"enctlv-key".as_slice()], &aead::CHACHA20_POLY1305)
            .expect("This should never fail"),
    );
    aead::LessSafeKey::new(unbound)
}

fn encrypt_payload(
    shared_secret: &ecdh::SharedSecret,
    plaintext: &[u8],
) -> Vec<u8> {
    let key = enctlv_key(shared_secret);
    let nonce = aead::Nonce::assume_unique_for_key([0u8; 12]);

    let mut buf = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut buf)
        .expect("sealing a short plaintext cannot fail");
    buf
}

/// The counterpart to [`encrypt_payload`], used only by our roundtrip tests
/// to prove a hop holding the right private key can recover the payload --
/// real forwarding nodes are external collaborators, not this crate.
#[cfg(test)]
fn decrypt_payload(
    shared_secret: &ecdh::SharedSecret,
    ciphertext: &[u8],
) -> Result<Vec<u8>, ring::error::Unspecified> {
    let key = enctlv_key(shared_secret);
    let nonce = aead::Nonce::assume_unique_for_key([0u8; 12]);

    let mut buf = ciphertext.to_vec();
    let plaintext = key.open_in_place(nonce, aead::Aad::empty(), &mut buf)?;
    Ok(plaintext.to_vec())
}

/// `H(E_i || ss_i)` as a scalar, used both to advance the blinding point and
/// to blind the hop's real node id.
fn blinding_factor(
    blinding_point: &PublicKey,
    shared_secret: &ecdh::SharedSecret,
) -> Scalar {
    let digest = sha256::digest_many(&[
        &blinding_point.serialize(),
        shared_secret.secret_bytes(),
    ]);
    let bytes: [u8; 32] =
        digest.as_ref().try_into().expect("sha256 is 32 bytes");
    Scalar::from_be_bytes(bytes)
        .expect("sha256 output is valid scalar with overwhelming probability")
}

/// Build a blinded reply path terminating at `self_id`, routed along
/// `route`'s hops in reverse (destination-first, per §4.6). Returns the path
/// plus its `reply_blinding` correlation token (`E`, the initial blinding
/// point).
pub fn build_reply_path<R: Crng>(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    rng: &mut R,
    route: &Route,
    self_id: &NodePk,
) -> Result<(BlindedPath, XOnlyPublicKey), OffersError> {
    let mut path_nodes: Vec<NodePk> =
        route.hops.iter().rev().cloned().collect();
    path_nodes.push(*self_id);

    if path_nodes.is_empty() {
        return Err(route_err("cannot build a reply path with no hops"));
    }

    let mut e_bytes = [0u8; 32];
    rng.fill_bytes(&mut e_bytes);
    let mut e = SecretKey::from_slice(&e_bytes).map_err(|err| {
        OffersError::new(
            OffersErrorKind::CryptoError,
            format!("ephemeral secret invalid: {err}"),
        )
    })?;
    let initial_blinding = PublicKey::from_secret_key(secp, &e);
    let reply_blinding = initial_blinding.x_only_public_key().0;

    let mut blinding_point = initial_blinding;
    let mut hops = Vec::with_capacity(path_nodes.len());

    for (i, node) in path_nodes.iter().enumerate() {
        let node_pubkey: PublicKey = (*node).into();
        let shared_secret = ecdh::SharedSecret::new(&node_pubkey, &e);
        let factor = blinding_factor(&blinding_point, &shared_secret);

        let blinded_node_id = node_pubkey
            .mul_tweak(secp, &factor)
            .map_err(|err| {
                OffersError::new(
                    OffersErrorKind::CryptoError,
                    format!("blinded node id tweak failed: {err}"),
                )
            })?
            .serialize();

        let plaintext = match path_nodes.get(i + 1) {
            Some(next) => {
                let next_pubkey: PublicKey = (*next).into();
                next_pubkey.serialize().to_vec()
            }
            None => Vec::new(),
        };
        let encrypted_payload = encrypt_payload(&shared_secret, &plaintext);

        hops.push(BlindedHop {
            blinded_node_id,
            encrypted_payload,
        });

        if i + 1 < path_nodes.len() {
            e = e.mul_tweak(&factor).map_err(|err| {
                OffersError::new(
                    OffersErrorKind::CryptoError,
                    format!("ephemeral secret tweak failed: {err}"),
                )
            })?;
            blinding_point = blinding_point.mul_tweak(secp, &factor).map_err(
                |err| {
                    OffersError::new(
                        OffersErrorKind::CryptoError,
                        format!("blinding point tweak failed: {err}"),
                    )
                },
            )?;
        }
    }

    let introduction_pubkey: PublicKey = path_nodes[0].into();
    let path = BlindedPath {
        introduction_node: introduction_pubkey.serialize(),
        blinding: initial_blinding.serialize(),
        hops,
    };

    Ok((path, reply_blinding))
}

/// Build the full send request for `invreq_payload` routed to `dest`,
/// bundling the forward hop list and the just-built reply path (§4.6 "Send").
pub fn build_send(
    route: &Route,
    reply_path: BlindedPath,
    invreq_payload: Vec<u8>,
) -> OnionMessageSend {
    let hops = route
        .hops
        .iter()
        .map(|node_id| RouteHop { node_id: *node_id })
        .collect();
    OnionMessageSend {
        hops,
        reply_path,
        payload: invreq_payload,
    }
}

#[cfg(test)]
mod test {
    use common::rng::SysRng;

    use super::*;

    fn node_pk(secp: &Secp256k1<bitcoin::secp256k1::All>, byte: u8) -> NodePk {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        NodePk(PublicKey::from_secret_key(secp, &sk))
    }

    #[test]
    fn reply_path_has_expected_shape() {
        let secp = Secp256k1::new();
        let mut rng = SysRng::new();
        let self_id = node_pk(&secp, 0x01);
        let route = Route {
            hops: vec![node_pk(&secp, 0x02), node_pk(&secp, 0x03)],
        };

        let (path, reply_blinding) =
            build_reply_path(&secp, &mut rng, &route, &self_id).unwrap();

        // introduction node is the far end of the forward route (reversed).
        let expected_intro: PublicKey = route.hops[1].into();
        assert_eq!(path.introduction_node, expected_intro.serialize());
        // 2 forward hops + self == 3 blinded hops.
        assert_eq!(path.hops.len(), 3);
        assert_eq!(
            PublicKey::from_slice(&path.blinding)
                .unwrap()
                .x_only_public_key()
                .0,
            reply_blinding
        );
    }

    #[test]
    fn introduction_hop_can_decrypt_next_hop_id() {
        let secp = Secp256k1::new();
        let mut rng = SysRng::new();
        let self_id = node_pk(&secp, 0x11);
        let intro_sk = SecretKey::from_slice(&[0x02; 32]).unwrap();
        let intro_node = NodePk(PublicKey::from_secret_key(&secp, &intro_sk));
        let route = Route {
            hops: vec![intro_node],
        };

        let (path, _reply_blinding) =
            build_reply_path(&secp, &mut rng, &route, &self_id).unwrap();

        let blinding_pubkey =
            PublicKey::from_slice(&path.blinding).unwrap();
        // The introduction node recovers ss using its own privkey + our
        // published blinding point -- ECDH commutativity with the sender's
        // (ephemeral secret, introduction node pubkey) computation.
        let ss = ecdh::SharedSecret::new(&blinding_pubkey, &intro_sk);

        let decrypted =
            decrypt_payload(&ss, &path.hops[0].encrypted_payload).unwrap();
        let expected_next: PublicKey = self_id.into();
        assert_eq!(decrypted, expected_next.serialize().to_vec());
    }
}
