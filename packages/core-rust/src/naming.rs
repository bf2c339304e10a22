//! Service name derivation.
//!
//! Client and server must agree on a queue name without sharing code, so the
//! transform is a pure function of the service identifier.

use std::sync::LazyLock;

use regex::Regex;

/// Lowercase letter (ASCII or Latin-1) followed by an uppercase one.
static CAMEL_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z\u{E0}-\u{FF}])([A-Z\u{C0}\u{DF}])").expect("static regex is valid")
});

/// Insert a hyphen at every lowercase-to-uppercase transition, then lowercase.
///
/// `"userAccounts"` becomes `"user-accounts"`.
#[must_use]
pub fn un_camel_case(s: &str) -> String {
    CAMEL_BOUNDARY.replace_all(s, "$1-$2").to_lowercase()
}

/// Lowercase only the first character of an identifier.
#[must_use]
pub fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Queue name for a service.
///
/// A self-reported name takes precedence over the type identifier; both go
/// through [`un_camel_case`]. The identifier additionally has its first
/// character lowercased, so `UserAccounts` and `userAccounts` agree.
#[must_use]
pub fn service_name(self_reported: Option<&str>, identifier: &str) -> String {
    match self_reported {
        Some(name) => un_camel_case(name),
        None => un_camel_case(&lower_first(identifier)),
    }
}

/// Bare identifier of a Rust type: last path segment, generics stripped.
///
/// `my_app::services::UserAccounts<Db>` yields `UserAccounts`.
#[must_use]
pub fn type_identifier<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    struct UserAccounts;
    struct Wrapper<T>(T);

    #[test]
    fn hyphenates_camel_case() {
        assert_eq!(un_camel_case("userAccounts"), "user-accounts");
        assert_eq!(un_camel_case("test"), "test");
        assert_eq!(un_camel_case("aBC"), "a-bc");
        assert_eq!(un_camel_case("caféÀla"), "café-àla");
    }

    #[test]
    fn identifier_gets_first_letter_lowered() {
        assert_eq!(service_name(None, "UserAccounts"), "user-accounts");
        assert_eq!(service_name(None, "Service"), "service");
    }

    #[test]
    fn self_reported_name_wins() {
        assert_eq!(service_name(Some("test"), "Service"), "test");
        assert_eq!(service_name(Some("billingApi"), "Billing"), "billing-api");
    }

    #[test]
    fn type_identifier_strips_path_and_generics() {
        assert_eq!(type_identifier::<UserAccounts>(), "UserAccounts");
        assert_eq!(type_identifier::<Wrapper<UserAccounts>>(), "Wrapper");
    }

    #[test]
    fn lower_first_handles_empty() {
        assert_eq!(lower_first(""), "");
        assert_eq!(lower_first("Échelle"), "échelle");
    }

    proptest! {
        #[test]
        fn derived_names_are_lowercase_and_stable(ident in "[A-Z][a-zA-Z]{0,20}") {
            let name = service_name(None, &ident);
            prop_assert_eq!(name.clone(), name.to_lowercase());
            prop_assert_eq!(service_name(None, &ident), name);
        }
    }
}
