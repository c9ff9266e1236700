//! Hidden-service name handling

use regex::Regex;
use std::sync::LazyLock;

// v2 (16 chars) and v3 (56 chars) base32 service names
static ONION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[a-z2-7]{16}|[a-z2-7]{56})\.onion$").unwrap());

/// Reduce user input like `http://Name.onion/path` to `name.onion`
pub fn normalize_hidden_service(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    host.to_ascii_lowercase()
}

/// Whether `name` is a well-formed hidden-service address
pub fn is_onion_address(name: &str) -> bool {
    ONION_REGEX.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V3: &str = "dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion";

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_hidden_service("  http://ABCDEFGHIJKLMNOP.onion/index.html "), "abcdefghijklmnop.onion");
        assert_eq!(normalize_hidden_service("abcdefghijklmnop.onion"), "abcdefghijklmnop.onion");
        assert_eq!(normalize_hidden_service("https://x.onion?q=1"), "x.onion");
    }

    #[test]
    fn test_onion_validation() {
        assert!(is_onion_address(V3));
        assert!(is_onion_address("abcdefghijklmnop.onion"));
        assert!(!is_onion_address("example.com"));
        assert!(!is_onion_address("short.onion"));
        assert!(!is_onion_address("abcdefghijklmnop.onion.evil.com"));
    }
}
