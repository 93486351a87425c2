//! Payer-key derivation (component C3).
//!
//! Every `invoice_request` carries a fresh, unlinkable `payer_key`: an
//! X-only pubkey tweaked off a single process-wide base pubkey by a random
//! 16-byte `payer_info`. The core only ever handles the public side of this
//! tweak -- the corresponding secret-side tweak is applied by the
//! [`crate::capabilities::Signer`] collaborator, which is the only party
//! that ever sees the base secret key.

use bitcoin::secp256k1::{
    self, PublicKey, Scalar, Secp256k1, XOnlyPublicKey,
};
use common::{rng::Crng, sha256};

use crate::error::{OffersError, OffersErrorKind};

/// Random byte-width of `payer_info`, per BOLT-12's recommendation.
pub const PAYER_INFO_LEN: usize = 16;

/// We expect `add_exp_tweak` to fail with probability ~2^-128 (the tweak
/// scalar landing outside `[1, n)`, or the tweaked point landing at
/// infinity). Looping more than a handful of times would indicate something
/// is structurally broken rather than bad luck, so we bound the retry loop
/// rather than spinning forever.
const MAX_ATTEMPTS: u32 = 8;

/// Derives per-request payer keys from a single process-scoped base pubkey.
#[derive(Clone, Debug)]
pub struct PayerKeyDeriver {
    base_pubkey: PublicKey,
}

/// The public output of a payer-key derivation: the tweaked X-only pubkey
/// plus the `payer_info` tweak input the signer needs to reproduce the
/// secret-side tweak.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DerivedPayerKey {
    pub payer_key: XOnlyPublicKey,
    pub payer_info: [u8; PAYER_INFO_LEN],
}

impl PayerKeyDeriver {
    pub fn new(base_pubkey: PublicKey) -> Self {
        Self { base_pubkey }
    }

    pub fn base_pubkey(&self) -> PublicKey {
        self.base_pubkey
    }

    /// Derive a fresh `payer_key` for a new invoice_request.
    ///
    /// `t = SHA256(P_base || payer_info)`; `P_payer = xonly(P_base + t*G)`.
    pub fn derive<R: Crng>(
        &self,
        secp: &Secp256k1<secp256k1::All>,
        rng: &mut R,
    ) -> Result<DerivedPayerKey, OffersError> {
        for _ in 0..MAX_ATTEMPTS {
            let mut payer_info = [0u8; PAYER_INFO_LEN];
            rng.fill_bytes(&mut payer_info);

            if let Ok(payer_key) = self.tweak(secp, &payer_info) {
                return Ok(DerivedPayerKey {
                    payer_key,
                    payer_info,
                });
            }
        }

        Err(OffersError::new(
            OffersErrorKind::CryptoError,
            "payer key tweak landed on an invalid point after \
             repeated retries",
        ))
    }

    /// Recompute the X-only payer pubkey for a `payer_info` that's already
    /// fixed (e.g. reused across a recurring payment's periods).
    pub fn rederive(
        &self,
        secp: &Secp256k1<secp256k1::All>,
        payer_info: &[u8; PAYER_INFO_LEN],
    ) -> Result<XOnlyPublicKey, OffersError> {
        self.tweak(secp, payer_info).map_err(|_| {
            OffersError::new(
                OffersErrorKind::CryptoError,
                "payer key tweak landed on an invalid point",
            )
        })
    }

    fn tweak(
        &self,
        secp: &Secp256k1<secp256k1::All>,
        payer_info: &[u8; PAYER_INFO_LEN],
    ) -> Result<XOnlyPublicKey, secp256k1::Error> {
        let tweak_input = sha256::digest_many(&[
            &self.base_pubkey.serialize(),
            payer_info.as_slice(),
        ]);
        let scalar = Scalar::from_be_bytes(
            tweak_input.as_ref().try_into().expect("sha256 is 32 bytes"),
        )?;
        let tweaked = self.base_pubkey.add_exp_tweak(secp, &scalar)?;
        Ok(tweaked.x_only_public_key().0)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::SecretKey;
    use common::rng::SysRng;

    use super::*;

    fn base_pubkey(secp: &Secp256k1<secp256k1::All>) -> PublicKey {
        let sk = SecretKey::from_slice(&[0x7a; 32]).unwrap();
        PublicKey::from_secret_key(secp, &sk)
    }

    #[test]
    fn derive_is_deterministic_given_payer_info() {
        let secp = Secp256k1::new();
        let base = base_pubkey(&secp);
        let deriver = PayerKeyDeriver::new(base);

        let payer_info = [0x99; PAYER_INFO_LEN];
        let a = deriver.rederive(&secp, &payer_info).unwrap();
        let b = deriver.rederive(&secp, &payer_info).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_payer_info_gives_different_keys() {
        let secp = Secp256k1::new();
        let base = base_pubkey(&secp);
        let deriver = PayerKeyDeriver::new(base);

        let mut rng = SysRng::new();
        let a = deriver.derive(&secp, &mut rng).unwrap();
        let b = deriver.derive(&secp, &mut rng).unwrap();
        assert_ne!(a.payer_info, b.payer_info);
        assert_ne!(a.payer_key, b.payer_key);
    }

    #[test]
    fn rederive_matches_freshly_derived_key() {
        let secp = Secp256k1::new();
        let base = base_pubkey(&secp);
        let deriver = PayerKeyDeriver::new(base);

        let mut rng = SysRng::new();
        let derived = deriver.derive(&secp, &mut rng).unwrap();
        let rederived =
            deriver.rederive(&secp, &derived.payer_info).unwrap();
        assert_eq!(derived.payer_key, rederived);
    }
}
