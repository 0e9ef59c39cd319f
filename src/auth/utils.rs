//! Input normalisation and token hashing helpers.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use subtle::ConstantTimeEq;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Blank phone numbers are stored as NULL so the unique index ignores them.
#[must_use]
pub fn normalize_phone(phone: Option<&str>) -> Option<String> {
    phone
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Hex SHA-256 of a refresh token; the plaintext never reaches storage.
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare two stored digests without leaking the mismatch position.
#[must_use]
pub fn digests_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Driver@CarHub.IO "), "driver@carhub.io");
    }

    #[test]
    fn valid_email_checks_shape() {
        assert!(valid_email("a@x.com"));
        assert!(!valid_email("a@x"));
        assert!(!valid_email("no at sign.com"));
        assert!(!valid_email("@x.com"));
    }

    #[test]
    fn email_pattern_compiles_once() {
        assert!(EMAIL_PATTERN.is_some());
        let first: *const Regex = EMAIL_PATTERN.as_ref().unwrap();
        let second: *const Regex = EMAIL_PATTERN.as_ref().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn normalize_phone_drops_blanks() {
        assert_eq!(normalize_phone(None), None);
        assert_eq!(normalize_phone(Some("   ")), None);
        assert_eq!(
            normalize_phone(Some(" +8801700000000 ")),
            Some("+8801700000000".to_string())
        );
    }

    #[test]
    fn refresh_hash_is_hex_sha256() {
        let hash = hash_refresh_token("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digests_match(&hash, &hash_refresh_token("abc")));
        assert!(!digests_match(&hash, &hash_refresh_token("abd")));
        assert!(!digests_match(&hash, ""));
    }
}
