//! Storage contract for users, one-time secrets and the notification outbox.
//!
//! Every method is one atomic unit: either all of its writes land (including
//! the outbox row) or none do. Implementations:
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`, one transaction per call.
//! - [`MemoryStore`]: process-local, one critical section per call.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{NewUser, NotificationJob, PendingSecret, SecretPurpose, SecretRecord, User};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

#[derive(Debug)]
pub enum RegisterOutcome {
    Created(User),
    EmailTaken,
}

/// Result of a conditional consume.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(SecretRecord),
    NotFound,
    Expired,
    AlreadyConsumed,
}

/// Write applied in the same transaction as a successful consume.
#[derive(Clone)]
pub enum ConsumeEffect {
    /// Stamp `email_verified_at` if not already set.
    VerifyEmail,
    /// Replace the password hash and invalidate the user's other reset tokens.
    ReplacePassword { password_hash: String },
}

impl std::fmt::Debug for ConsumeEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerifyEmail => f.write_str("VerifyEmail"),
            Self::ReplacePassword { .. } => f
                .debug_struct("ReplacePassword")
                .field("password_hash", &"***")
                .finish(),
        }
    }
}

pub trait CredentialStore: Send + Sync {
    /// Create an unverified user, its first secret and the delivery job.
    ///
    /// Returns `EmailTaken` without writing anything when the email exists.
    fn insert_user_with_secret<'a>(
        &'a self,
        user: NewUser,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, RegisterOutcome>;

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>>;

    /// Invalidate the user's outstanding secrets of this purpose, then write
    /// the new one and its delivery job.
    fn issue_secret<'a>(
        &'a self,
        user_id: Uuid,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, SecretRecord>;

    /// Mark the secret consumed if it is outstanding and apply `effect`.
    ///
    /// When nothing is consumed the outcome says why, checking consumption
    /// before expiry.
    fn consume_secret<'a>(
        &'a self,
        purpose: SecretPurpose,
        token_hash: &'a [u8],
        effect: ConsumeEffect,
    ) -> StoreFuture<'a, ConsumeOutcome>;

    fn latest_secret_created_at<'a>(
        &'a self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> StoreFuture<'a, Option<DateTime<Utc>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_password_debug_redacts_hash() {
        let effect = ConsumeEffect::ReplacePassword {
            password_hash: "$argon2id$v=19$secret".to_string(),
        };
        let rendered = format!("{effect:?}");
        assert!(!rendered.contains("argon2id"));
        assert_eq!(format!("{:?}", ConsumeEffect::VerifyEmail), "VerifyEmail");
    }

    #[test]
    fn consume_outcome_debug_names() {
        assert_eq!(format!("{:?}", ConsumeOutcome::NotFound), "NotFound");
        assert_eq!(format!("{:?}", ConsumeOutcome::Expired), "Expired");
        assert_eq!(
            format!("{:?}", ConsumeOutcome::AlreadyConsumed),
            "AlreadyConsumed"
        );
    }
}
