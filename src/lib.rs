//! # CarHub Auth (principal authentication and authorization core)
//!
//! `carhub-auth` authenticates three principal classes (end-users, partners and
//! administrators) against a shared relational store. It issues and rotates
//! signed session tokens, gates account activation behind one-time codes and
//! resolves administrator permissions through a role/permission graph.
//!
//! ## Sessions
//!
//! Access and refresh tokens are HS256 JWTs signed with one shared secret. The
//! server keeps a single refresh session per principal holding only the SHA-256
//! of the current refresh token. Every sign-in and every refresh replaces that
//! row, so a superseded refresh token can never be redeemed again.
//!
//! ## Verification
//!
//! New users and partners start unverified. A numeric code is stored per
//! (owner, owner type, purpose) and consuming it flips `email_verified` in the
//! same transaction. Only one live code may exist at a time.
//!
//! ## Authorization
//!
//! Admin permissions are resolved on every request: a role flagged
//! `is_super_admin` grants everything, otherwise the permission must be reachable
//! through an assigned role.

pub mod api;
pub mod auth;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
