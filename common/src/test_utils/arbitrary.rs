use proptest::{arbitrary::any, strategy::Strategy};

/// Like [`any::<String>()`], but bounded to a reasonable length so that
/// shrinking stays fast.
///
/// Generated strings have anywhere from 0 to 256 characters.
///
/// ```
/// use common::test_utils::arbitrary;
/// use proptest_derive::Arbitrary;
///
/// #[derive(Debug, Arbitrary)]
/// struct Foo {
///     #[proptest(strategy = "arbitrary::any_string()")]
///     name: String,
/// }
/// ```
pub fn any_string() -> impl Strategy<Value = String> {
    // Maximum length = 256
    proptest::collection::vec(any::<char>(), 0..256)
        .prop_map(|chars| String::from_iter(chars.into_iter()))
}

/// An [`Option`] version of [`any_string`].
///
/// The option has a 50% probability of being [`Some`].
pub fn any_option_string() -> impl Strategy<Value = Option<String>> {
    proptest::option::weighted(0.5, any_string())
}
