//! Error taxonomy for the credential services.
//!
//! Every failure is one of three classes:
//!
//! - **Validation**: malformed input the caller can fix. Returned immediately and
//!   never logged as an error.
//! - **Domain**: expected outcomes of the credential state machine. They map to
//!   fixed user-facing messages that never reveal whether it was the email or the
//!   password that was wrong.
//! - **Infra**: storage, outbox or hashing failures. Logged server-side with
//!   detail and surfaced to users as an opaque failure.

use thiserror::Error;

/// Coarse classification used by callers to pick a response shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Domain,
    Infra,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("password must be at most {max} characters")]
    PasswordTooLong { max: usize },
    #[error("missing code")]
    MissingSecret,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("email already registered")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("invalid verification code")]
    InvalidCode,
    #[error("verification code expired")]
    ExpiredCode,
    #[error("invalid reset code")]
    InvalidResetCode,
    #[error("reset code expired")]
    ExpiredResetCode,
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

impl CredentialError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::EmailTaken
            | Self::InvalidCredentials
            | Self::EmailNotVerified
            | Self::InvalidCode
            | Self::ExpiredCode
            | Self::InvalidResetCode
            | Self::ExpiredResetCode => ErrorClass::Domain,
            Self::Infra(_) => ErrorClass::Infra,
        }
    }

    /// Message safe to show to the end user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidEmail) => "Please enter a valid email address",
            Self::Validation(ValidationError::PasswordMismatch) => "Passwords do not match",
            Self::Validation(ValidationError::PasswordTooShort { .. }) => "Password is too short",
            Self::Validation(ValidationError::PasswordTooLong { .. }) => "Password is too long",
            Self::Validation(ValidationError::MissingSecret) => "Please enter the code you received",
            Self::EmailTaken => "An account with that email already exists",
            Self::InvalidCredentials => "Invalid email or password",
            Self::EmailNotVerified => "Please verify your email before logging in",
            Self::InvalidCode => "Invalid verification code",
            Self::ExpiredCode => "Verification code has expired",
            Self::InvalidResetCode => "Invalid reset code",
            Self::ExpiredResetCode => "Reset code has expired",
            Self::Infra(_) => "Something went wrong, please try again",
        }
    }

    /// The fix is a fresh code rather than re-typing the current one.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::ExpiredCode | Self::ExpiredResetCode)
    }
}

/// The single response shown for every password-reset request.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists with that email, you will receive password reset instructions.";

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classes_cover_every_kind() {
        assert_eq!(
            CredentialError::from(ValidationError::PasswordMismatch).class(),
            ErrorClass::Validation
        );
        for err in [
            CredentialError::EmailTaken,
            CredentialError::InvalidCredentials,
            CredentialError::EmailNotVerified,
            CredentialError::InvalidCode,
            CredentialError::ExpiredCode,
            CredentialError::InvalidResetCode,
            CredentialError::ExpiredResetCode,
        ] {
            assert_eq!(err.class(), ErrorClass::Domain, "{err}");
        }
        assert_eq!(
            CredentialError::from(anyhow!("db down")).class(),
            ErrorClass::Infra
        );
    }

    #[test]
    fn infra_message_hides_detail() {
        let err = CredentialError::from(anyhow!("connection refused to 10.0.0.5"));
        assert!(!err.user_message().contains("10.0.0.5"));
        assert!(err.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn expired_kinds_prompt_for_new_secret() {
        assert!(CredentialError::ExpiredCode.is_expired());
        assert!(CredentialError::ExpiredResetCode.is_expired());
        assert!(!CredentialError::InvalidCode.is_expired());
        assert_ne!(
            CredentialError::InvalidCode.user_message(),
            CredentialError::ExpiredCode.user_message()
        );
    }

    #[test]
    fn validation_display_includes_policy() {
        let err = ValidationError::PasswordTooShort { min: 8 };
        assert_eq!(err.to_string(), "password must be at least 8 characters");
    }
}
