//! Argon2id password hashing.

use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;

/// Hash a password into a PHC string (`$argon2id$...`).
///
/// # Errors
/// Returns an error if Argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| anyhow!("failed to hash password"))
}

/// Check a password against a stored PHC string.
///
/// Unparseable hashes verify as `false`.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash compared against when an email is unknown, so the miss costs the
/// same as a wrong password.
///
/// # Errors
/// Returns an error if Argon2 rejects the input.
pub fn decoy_hash() -> Result<String> {
    hash_password("carhub-decoy-password")
}
