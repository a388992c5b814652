//! Records shared between the services and the credential store.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// Identity record. The email is stored normalized (trimmed, lowercased).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Fields needed to create a user row.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("password_hash", &"***")
            .finish()
    }
}

/// What a one-time secret proves possession of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecretPurpose {
    /// Email confirmation code issued at registration.
    Confirmation,
    /// Password reset token issued on request.
    PasswordReset,
}

impl SecretPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmation => "confirmation",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for SecretPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly minted secret, ready to be written. Only the hash is kept.
#[derive(Clone, Debug)]
pub struct PendingSecret {
    pub purpose: SecretPurpose,
    pub token_hash: Vec<u8>,
    pub ttl_seconds: i64,
}

/// A stored verification code or reset token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: SecretPurpose,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Unconsumed and not yet expired at `now`.
    #[must_use]
    pub fn is_outstanding(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.expires_at > now
    }
}

/// Typed payload handed to the notification outbox.
#[derive(Clone, PartialEq, Eq)]
pub enum NotificationJob {
    ConfirmationEmail {
        email: String,
        code: String,
        confirm_url: String,
    },
    ResetEmail {
        email: String,
        token: String,
        reset_url: String,
    },
}

impl NotificationJob {
    /// Build the job that delivers a freshly issued secret to its owner.
    #[must_use]
    pub fn for_secret(
        purpose: SecretPurpose,
        email: &str,
        plaintext: &str,
        frontend_base_url: &str,
    ) -> Self {
        let base = frontend_base_url.trim_end_matches('/');
        match purpose {
            SecretPurpose::Confirmation => Self::ConfirmationEmail {
                email: email.to_string(),
                code: plaintext.to_string(),
                confirm_url: format!("{base}/confirmations/new"),
            },
            SecretPurpose::PasswordReset => Self::ResetEmail {
                email: email.to_string(),
                token: plaintext.to_string(),
                reset_url: format!("{base}/reset-password/{plaintext}"),
            },
        }
    }

    /// Template name stored with the outbox row.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfirmationEmail { .. } => "confirmation_email",
            Self::ResetEmail { .. } => "reset_email",
        }
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        match self {
            Self::ConfirmationEmail { email, .. } | Self::ResetEmail { email, .. } => email,
        }
    }

    /// The secret this job carries, in plaintext.
    #[must_use]
    pub fn secret(&self) -> &str {
        match self {
            Self::ConfirmationEmail { code, .. } => code,
            Self::ResetEmail { token, .. } => token,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::ConfirmationEmail {
                email,
                code,
                confirm_url,
            } => json!({
                "email": email,
                "code": code,
                "confirm_url": confirm_url,
            }),
            Self::ResetEmail {
                email,
                token,
                reset_url,
            } => json!({
                "email": email,
                "token": token,
                "reset_url": reset_url,
            }),
        }
    }
}

// Jobs carry plaintext secrets; keep them out of logs.
impl fmt::Debug for NotificationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationJob")
            .field("kind", &self.kind())
            .field("recipient", &self.recipient())
            .field("secret", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn reset_job_builds_link_without_double_slash() {
        let job = NotificationJob::for_secret(
            SecretPurpose::PasswordReset,
            "a@x.com",
            "tok",
            "https://latchkey.dev/",
        );
        assert_eq!(job.kind(), "reset_email");
        assert_eq!(job.recipient(), "a@x.com");
        assert_eq!(job.secret(), "tok");
        assert_eq!(
            job.payload()["reset_url"],
            "https://latchkey.dev/reset-password/tok"
        );
    }

    #[test]
    fn confirmation_job_payload_carries_code() {
        let job = NotificationJob::for_secret(
            SecretPurpose::Confirmation,
            "a@x.com",
            "ABCDE12345",
            "https://latchkey.dev",
        );
        assert_eq!(job.kind(), "confirmation_email");
        let payload = job.payload();
        assert_eq!(payload["code"], "ABCDE12345");
        assert_eq!(payload["email"], "a@x.com");
    }

    #[test]
    fn debug_output_redacts_secret() {
        let job = NotificationJob::for_secret(
            SecretPurpose::Confirmation,
            "a@x.com",
            "SUPERSECRET",
            "https://latchkey.dev",
        );
        let rendered = format!("{job:?}");
        assert!(!rendered.contains("SUPERSECRET"));
        assert!(rendered.contains("confirmation_email"));

        let user = NewUser {
            email: "a@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
        };
        assert!(!format!("{user:?}").contains("argon2id"));
    }

    #[test]
    fn secret_record_outstanding_window() {
        let now = Utc::now();
        let mut record = SecretRecord {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            purpose: SecretPurpose::Confirmation,
            token_hash: vec![1, 2, 3],
            expires_at: now + Duration::minutes(5),
            consumed_at: None,
            created_at: now,
        };
        assert!(record.is_outstanding(now));
        assert!(!record.is_outstanding(now + Duration::minutes(5)));
        record.consumed_at = Some(now);
        assert!(!record.is_outstanding(now));
    }

    #[test]
    fn purpose_labels_are_stable() {
        assert_eq!(SecretPurpose::Confirmation.as_str(), "confirmation");
        assert_eq!(SecretPurpose::PasswordReset.to_string(), "password_reset");
    }
}
