/// Small `proptest` `Arbitrary`-like strategies not tied to any one type.
pub mod arbitrary;
/// Quickly create roundtrip proptest for various serialization schemes.
pub mod roundtrip;
