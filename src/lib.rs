//! # Latchkey (credential and verification lifecycle)
//!
//! `latchkey` owns the part of a web application that has real invariants:
//! registering users, confirming their email address, authenticating
//! passwords, and resetting forgotten passwords. Routing, templating and cookie
//! transport stay in the host application; it calls [`credentials::CredentialService`]
//! and [`credentials::SessionCodec`] with plain data and maps the typed results.
//!
//! ## One-time secrets
//!
//! Verification codes and reset tokens are stored as keyed hashes only. Issuing
//! a secret invalidates every outstanding secret of the same purpose for that
//! user, and consuming one is a single conditional update, so a secret can be
//! spent at most once even under concurrent requests.
//!
//! ## Anti-enumeration
//!
//! Login failures for unknown accounts still pay for a password verification,
//! and password-reset requests always report success. Callers cannot tell from
//! the response whether an account exists.
//!
//! ## Notifications
//!
//! Confirmation and reset emails are written to a transactional outbox in the
//! same transaction as the secret they carry. The outbox worker in
//! [`api::email`] delivers them.

pub mod api;
pub mod cli;
pub mod credentials;

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
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
