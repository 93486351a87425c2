use std::{fmt, str::FromStr};

use bitcoin::secp256k1;
#[cfg(any(test, feature = "test-utils"))]
use proptest::{
    arbitrary::{any, Arbitrary},
    strategy::{BoxedStrategy, Strategy},
};
use ref_cast::RefCast;
use serde::{Deserialize, Serialize};

/// A simple wrapper around [`secp256k1::PublicKey`] which allows for
/// `Arbitrary` and other custom impls.
///
/// # Notes
///
/// - We do not represent the inner value as `[u8; 33]` (the output of
///   [`secp256k1::PublicKey::serialize`]) because not all `[u8; 33]`s are
///   valid pubkeys.
/// - We use [`PublicKey`]'s [`Serialize`] / [`Deserialize`] impls because it
///   calls into `secp256k1` which does complicated validation to ensure that
///   [`PublicKey`] is always valid.
/// - We use [`PublicKey`]'s [`FromStr`] / [`fmt::Display`] impls for similar
///   reasons. Nevertheless, we still run proptests to check for correctness.
///
/// [`PublicKey`]: secp256k1::PublicKey
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
#[derive(RefCast, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodePk(pub secp256k1::PublicKey);

impl NodePk {
    pub fn as_x_only(&self) -> secp256k1::XOnlyPublicKey {
        self.0.x_only_public_key().0
    }
}

impl FromStr for NodePk {
    type Err = secp256k1::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        secp256k1::PublicKey::from_str(s).map(Self)
    }
}

impl fmt::Display for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePk({self})")
    }
}

impl From<NodePk> for secp256k1::PublicKey {
    fn from(node_pk: NodePk) -> Self {
        node_pk.0
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Arbitrary for NodePk {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use bitcoin::secp256k1::Secp256k1;

        any::<[u8; 32]>()
            .prop_filter_map("not a valid secret key", |bytes| {
                let ctx = Secp256k1::new();
                secp256k1::SecretKey::from_slice(&bytes)
                    .ok()
                    .map(|sk| Self(sk.public_key(&ctx)))
            })
            .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn node_pk_roundtrips() {
        roundtrip::fromstr_display_roundtrip_proptest::<NodePk>();
        roundtrip::json_string_roundtrip_proptest::<NodePk>();
    }
}
