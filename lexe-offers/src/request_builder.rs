//! Request builder (component C5): turn `(offer, user parameters)` into a
//! fully-populated, recurrence-signed [`InvoiceRequest`], enforcing every
//! BOLT-12 "MUST (not) supply this field" rule along the way.
//!
//! This is kept separate from [`crate::invoice_request`] (the bare wire
//! codec) because the rules here need three things at once that a codec
//! has no business knowing about: the originating [`Offer`], the caller's
//! [`RequestParams`], and (for recurrence continuity) the payment history
//! kept by the [`crate::capabilities::Wallet`] collaborator.

use bitcoin::secp256k1::{self, Secp256k1, XOnlyPublicKey};
use common::{ln::network::LxNetwork, rng::Crng};
use thiserror::Error;

use crate::{
    capabilities::{Signer, Wallet},
    error::{FatalError, OffersError, OffersErrorKind},
    invoice_request::InvoiceRequest,
    keys::{PayerKeyDeriver, PAYER_INFO_LEN},
    offer::Offer,
};

fn sem_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::SemanticError, msg)
}

/// Errors raised while building an invoice_request: either a validation
/// failure the caller can act on, or a [`FatalError`] from the signer
/// collaborator (per §7, fatal at the core).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Invalid(#[from] OffersError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// User-supplied parameters for a single `fetch_invoice`/
/// `create_invoice_request` call, per §6's user-visible surface.
#[derive(Clone, Debug, Default)]
pub struct RequestParams {
    /// Required iff `offer.amount` is unset; forbidden otherwise.
    pub amount_msat: Option<u64>,
    /// Required iff the offer specifies a quantity range; forbidden
    /// otherwise.
    pub quantity: Option<u64>,
    /// Required iff the offer has `recurrence`; forbidden otherwise.
    pub recurrence_counter: Option<u32>,
    /// Required iff the offer's `recurrence_base.start_any_period != 0`;
    /// forbidden otherwise.
    pub recurrence_start: Option<u32>,
    /// Required iff the offer has `recurrence`; used to look up payment
    /// continuity in the wallet's payment store.
    pub recurrence_label: Option<String>,
    pub payer_note: Option<String>,
    /// The target chain, or `None` to pay on whatever the offer's default
    /// (bitcoin mainnet) is.
    pub chain: Option<[u8; 32]>,
    pub features: Vec<u8>,
}

/// Build and sign an [`InvoiceRequest`] for `offer` given `params`, per
/// spec §4.5's numbered rules.
///
/// `now_secs` is threaded in explicitly (rather than read from the system
/// clock here) so the expiry check is deterministic under test.
#[allow(clippy::too_many_arguments)]
pub async fn build<R: Crng>(
    secp: &Secp256k1<secp256k1::All>,
    rng: &mut R,
    wallet: &dyn Wallet,
    signer: &dyn Signer,
    deriver: &PayerKeyDeriver,
    offer: &Offer,
    params: RequestParams,
    now_secs: u64,
) -> Result<InvoiceRequest, BuildError> {
    let offer_id = offer.offer_id()?;

    if offer.send_invoice {
        return Err(sem_err(
            "send_invoice offers cannot be used to fetch an invoice",
        )
        .into());
    }

    if offer.is_expired_at(now_secs) {
        return Err(sem_err("offer has expired").into());
    }

    let amount = match offer.amount {
        Some(_) => {
            if params.amount_msat.is_some() {
                return Err(sem_err(
                    "amount must not be supplied: offer already specifies \
                     one",
                )
                .into());
            }
            None
        }
        None => {
            let amount_msat = params.amount_msat.ok_or_else(|| {
                sem_err(
                    "amount_msat is required: offer did not specify one",
                )
            })?;
            Some(amount_msat)
        }
    };

    let quantity = if offer.expects_quantity() {
        let quantity = params.quantity.ok_or_else(|| {
            sem_err("quantity is required by this offer")
        })?;
        let min = offer.min_quantity();
        let in_range = match offer.max_quantity() {
            Some(max) => (min..=max).contains(&quantity),
            None => quantity >= min,
        };
        if !in_range {
            return Err(sem_err(format!(
                "quantity {quantity} outside offer's allowed range"
            ))
            .into());
        }
        Some(quantity)
    } else {
        if params.quantity.is_some() {
            return Err(sem_err(
                "quantity must not be supplied: offer has no quantity \
                 range",
            )
            .into());
        }
        None
    };

    let (recurrence_counter, recurrence_start, recurrence_label) =
        match &offer.recurrence {
            Some(_) => {
                let counter = params.recurrence_counter.ok_or_else(|| {
                    sem_err("recurrence_counter is required by this offer")
                })?;
                let label = params.recurrence_label.clone().ok_or_else(
                    || sem_err("recurrence_label is required by this offer"),
                )?;
                let start_any_period = offer
                    .recurrence_base
                    .map(|b| b.start_any_period)
                    .unwrap_or(0);
                let start = if start_any_period != 0 {
                    Some(params.recurrence_start.ok_or_else(|| {
                        sem_err(
                            "recurrence_start is required by this offer",
                        )
                    })?)
                } else {
                    if params.recurrence_start.is_some() {
                        return Err(sem_err(
                            "recurrence_start must not be supplied: offer \
                             does not allow starting mid-schedule",
                        )
                        .into());
                    }
                    None
                };
                (Some(counter), start, Some(label))
            }
            None => {
                if params.recurrence_counter.is_some()
                    || params.recurrence_start.is_some()
                    || params.recurrence_label.is_some()
                {
                    return Err(sem_err(
                        "recurrence fields must not be supplied: offer has \
                         no recurrence",
                    )
                    .into());
                }
                (None, None, None)
            }
        };

    let payer_info = resolve_payer_info(
        secp,
        rng,
        wallet,
        deriver,
        &offer_id,
        recurrence_counter,
        recurrence_label.as_deref(),
    )
    .await?;
    let payer_key = deriver.rederive(secp, &payer_info)?;

    let chain = resolve_chain(offer, params.chain)?;

    let mut invreq = InvoiceRequest {
        chain,
        features: params.features,
        amount,
        quantity,
        offer_id,
        payer_key,
        payer_info: payer_info.to_vec(),
        payer_note: params.payer_note,
        recurrence_counter,
        recurrence_start,
        recurrence_signature: None,
    };

    if offer.recurrence.is_some() {
        sign_recurrence(secp, signer, &mut invreq).await?;
    }

    Ok(invreq)
}

/// Resolve the `payer_info` to use for this request: mint fresh random
/// bytes for a non-recurring request or the first period of a recurring
/// one, or reuse a prior period's `payer_info` for continuity, per §4.5.
async fn resolve_payer_info<R: Crng>(
    secp: &Secp256k1<secp256k1::All>,
    rng: &mut R,
    wallet: &dyn Wallet,
    deriver: &PayerKeyDeriver,
    offer_id: &[u8; 32],
    recurrence_counter: Option<u32>,
    recurrence_label: Option<&str>,
) -> Result<[u8; PAYER_INFO_LEN], BuildError> {
    let Some(counter) = recurrence_counter else {
        return Ok(deriver.derive(secp, rng)?.payer_info);
    };
    // Presence of `recurrence_counter` implies `recurrence_label` was
    // validated as present by the caller.
    let label = recurrence_label.expect("recurrence_label checked above");
    let payments = wallet.list_payments_by_label(label).await;

    if counter == 0 {
        let prior = payments
            .iter()
            .find(|p| &p.offer_id == offer_id && p.recurrence_counter == 0);
        return match prior {
            Some(p) => payer_info_from_record(&p.payer_info),
            None => Ok(deriver.derive(secp, rng)?.payer_info),
        };
    }

    let prior_counter = counter - 1;
    let prior = payments
        .iter()
        .find(|p| &p.offer_id == offer_id && p.recurrence_counter == prior_counter);
    match prior {
        None => Err(sem_err(
            "No previous payment attempted for this label and offer",
        )
        .into()),
        Some(p) if !p.complete => Err(sem_err(
            "Previous payment for this label and offer has not completed",
        )
        .into()),
        Some(p) => payer_info_from_record(&p.payer_info).map_err(Into::into),
    }
}

fn payer_info_from_record(
    bytes: &[u8],
) -> Result<[u8; PAYER_INFO_LEN], BuildError> {
    <[u8; PAYER_INFO_LEN]>::try_from(bytes)
        .map_err(|_| {
            sem_err(
                "stored payer_info has unexpected length for this label \
                 and offer",
            )
            .into()
        })
}

fn resolve_chain(
    offer: &Offer,
    chain: Option<[u8; 32]>,
) -> Result<Option<[u8; 32]>, OffersError> {
    let Some(chain) = chain else {
        return Ok(None);
    };
    if !offer.supports_chain(chain) {
        return Err(OffersError::new(
            OffersErrorKind::CryptoError,
            "offer does not support the requested chain",
        ));
    }
    let mainnet = LxNetwork::Mainnet.genesis_chain_hash().to_bytes();
    Ok(if chain == mainnet { None } else { Some(chain) })
}

/// Obtain `recurrence_signature` from the signer and verify it before
/// accepting, addressing the source's `FIXME: Validate signature!` (§9
/// open question 1): a recurrence signature is only ever useful to the
/// rest of the engine once we know it actually verifies against the
/// `payer_key` we just derived.
async fn sign_recurrence(
    secp: &Secp256k1<secp256k1::All>,
    signer: &dyn Signer,
    invreq: &mut InvoiceRequest,
) -> Result<(), BuildError> {
    let root = invreq.merkle_root()?;
    let sig = signer
        .sign_bolt12(
            "invoice_request",
            "recurrence_signature",
            root,
            Some(&invreq.payer_info),
        )
        .await?;
    invreq.recurrence_signature = Some(sig);
    invreq.verify_recurrence_signature(secp)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use bitcoin::secp256k1::{schnorr, KeyPair, PublicKey, SecretKey};
    use common::rng::SysRng;

    use super::*;
    use crate::{
        capabilities::{OfferRecord, OfferStatus, PaymentRecord},
        fields::{Recurrence, RecurrenceBase, RecurrencePeriodKind},
        offer::OfferBuilder,
    };

    /// Stands in for the real signer, which owns the payer-base secret key
    /// and applies the scalar-side tweak itself (§4.3: "the core never sees
    /// the secret"). `sign_bolt12` is only ever called here for
    /// `recurrence_signature`, which must verify against the *tweaked*
    /// `payer_key` ([`crate::keys::PayerKeyDeriver::rederive`]), so this fake
    /// has to re-derive the same tweaked secret rather than sign with the
    /// bare base key.
    struct FakeSigner {
        base_keypair: KeyPair,
    }

    #[async_trait]
    impl Signer for FakeSigner {
        async fn sign_bolt12(
            &self,
            message_name: &str,
            field_name: &str,
            merkle_root: [u8; 32],
            payer_info: Option<&[u8]>,
        ) -> Result<schnorr::Signature, FatalError> {
            let secp = Secp256k1::new();
            let payer_info = payer_info
                .expect("recurrence_signature signing always carries payer_info");
            let tweak_input = common::sha256::digest_many(&[
                &self.base_keypair.public_key().serialize(),
                payer_info,
            ]);
            let scalar = secp256k1::Scalar::from_be_bytes(
                tweak_input.as_ref().try_into().expect("sha256 is 32 bytes"),
            )
            .expect("payer key tweak landed on an invalid scalar");
            let base_secret =
                SecretKey::from_slice(&self.base_keypair.secret_bytes())
                    .expect("keypair's secret bytes are a valid secret key");
            let tweaked_secret = base_secret
                .add_tweak(&scalar)
                .expect("payer key tweak landed on an invalid point");
            let tweaked_keypair =
                KeyPair::from_secret_key(&secp, tweaked_secret);
            Ok(crate::signature::sign(
                &secp,
                message_name,
                field_name,
                merkle_root,
                &tweaked_keypair,
                &[0x24; 32],
            ))
        }

        async fn payer_base_pubkey(
            &self,
        ) -> Result<PublicKey, FatalError> {
            Ok(self.base_keypair.public_key())
        }
    }

    #[derive(Default)]
    struct FakeWallet {
        payments: Vec<PaymentRecord>,
    }

    #[async_trait]
    impl Wallet for FakeWallet {
        async fn create_offer(
            &self,
            _record: OfferRecord,
        ) -> Result<(), OffersError> {
            unimplemented!()
        }
        async fn find_offer(&self, _offer_id: &[u8; 32]) -> Option<OfferRecord> {
            None
        }
        async fn list_offers(&self) -> Vec<OfferRecord> {
            vec![]
        }
        async fn disable_offer(
            &self,
            _offer_id: &[u8; 32],
        ) -> Result<OfferStatus, OffersError> {
            unimplemented!()
        }
        async fn list_payments_by_label(
            &self,
            label: &str,
        ) -> Vec<PaymentRecord> {
            self.payments
                .iter()
                .filter(|p| p.label == label)
                .cloned()
                .collect()
        }
    }

    fn keypair(secp: &Secp256k1<secp256k1::All>, byte: u8) -> KeyPair {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        KeyPair::from_secret_key(secp, sk)
    }

    #[tokio::test]
    async fn fixed_amount_offer_requires_no_amount_param() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "coffee".into())
            .amount_msat(1_000)
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet::default();
        let mut rng = SysRng::new();

        let invreq = build(
            &secp,
            &mut rng,
            &wallet,
            &signer,
            &deriver,
            &offer,
            RequestParams::default(),
            0,
        )
        .await
        .unwrap();

        assert_eq!(invreq.amount, None);
        assert_eq!(invreq.offer_id, offer.offer_id().unwrap());
    }

    #[tokio::test]
    async fn variable_amount_offer_rejects_missing_amount() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "coffee".into())
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet::default();
        let mut rng = SysRng::new();

        let err = build(
            &secp,
            &mut rng,
            &wallet,
            &signer,
            &deriver,
            &offer,
            RequestParams::default(),
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildError::Invalid(_)));
    }

    #[tokio::test]
    async fn expired_offer_is_rejected() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "coffee".into())
            .amount_msat(1_000)
            .absolute_expiry(100)
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet::default();
        let mut rng = SysRng::new();

        let err = build(
            &secp,
            &mut rng,
            &wallet,
            &signer,
            &deriver,
            &offer,
            RequestParams::default(),
            200,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildError::Invalid(_)));
    }

    #[tokio::test]
    async fn recurrence_counter_zero_mints_fresh_payer_info() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "subscription".into())
            .amount_msat(1_000)
            .recurrence(
                Recurrence {
                    period_kind: RecurrencePeriodKind::Days,
                    period_count: 30,
                },
                RecurrenceBase {
                    start_any_period: 0,
                    basetime: 1_600_000_000,
                },
            )
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet::default();
        let mut rng = SysRng::new();

        let params = RequestParams {
            recurrence_counter: Some(0),
            recurrence_label: Some("sub".to_string()),
            ..Default::default()
        };

        let invreq = build(
            &secp, &mut rng, &wallet, &signer, &deriver, &offer, params, 0,
        )
        .await
        .unwrap();

        assert_eq!(invreq.recurrence_counter, Some(0));
        assert!(invreq.recurrence_signature.is_some());
        invreq.verify_recurrence_signature(&secp).unwrap();
    }

    #[tokio::test]
    async fn recurrence_counter_one_without_prior_payment_fails() {
        // S6: recurrence_counter=1 with no completed payment for counter 0.
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "subscription".into())
            .amount_msat(1_000)
            .recurrence(
                Recurrence {
                    period_kind: RecurrencePeriodKind::Days,
                    period_count: 30,
                },
                RecurrenceBase {
                    start_any_period: 0,
                    basetime: 1_600_000_000,
                },
            )
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet::default();
        let mut rng = SysRng::new();

        let params = RequestParams {
            recurrence_counter: Some(1),
            recurrence_label: Some("sub".to_string()),
            ..Default::default()
        };

        let err = build(
            &secp, &mut rng, &wallet, &signer, &deriver, &offer, params, 0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildError::Invalid(_)));
    }

    #[tokio::test]
    async fn recurrence_counter_one_reuses_completed_prior_payer_info() {
        let secp = Secp256k1::new();
        let node_kp = keypair(&secp, 0x01);
        let (node_id, _) = node_kp.x_only_public_key();
        let offer = OfferBuilder::new(node_id, "subscription".into())
            .amount_msat(1_000)
            .recurrence(
                Recurrence {
                    period_kind: RecurrencePeriodKind::Days,
                    period_count: 30,
                },
                RecurrenceBase {
                    start_any_period: 0,
                    basetime: 1_600_000_000,
                },
            )
            .build(&secp, &node_kp, &[1; 32])
            .unwrap();
        let offer_id = offer.offer_id().unwrap();

        let base_kp = keypair(&secp, 0x02);
        let deriver = PayerKeyDeriver::new(base_kp.public_key());
        let signer = FakeSigner {
            base_keypair: base_kp,
        };
        let wallet = FakeWallet {
            payments: vec![PaymentRecord {
                offer_id,
                label: "sub".to_string(),
                recurrence_counter: 0,
                payer_info: vec![0x77; PAYER_INFO_LEN],
                complete: true,
            }],
        };
        let mut rng = SysRng::new();

        let params = RequestParams {
            recurrence_counter: Some(1),
            recurrence_label: Some("sub".to_string()),
            ..Default::default()
        };

        let invreq = build(
            &secp, &mut rng, &wallet, &signer, &deriver, &offer, params, 0,
        )
        .await
        .unwrap();

        assert_eq!(invreq.payer_info, vec![0x77; PAYER_INFO_LEN]);
    }
}
