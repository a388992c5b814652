//! Email confirmation and confirmation-code resends.

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};

use super::error::{CredentialError, ValidationError};
use super::models::SecretPurpose;
use super::secrets::ConsumeError;
use super::service::{infra, CredentialService};
use super::store::ConsumeEffect;
use super::utils::{normalize_email, valid_email};

/// What a resend request ended up doing. Never shown to the caller.
#[derive(Debug, PartialEq, Eq)]
enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

impl CredentialService {
    /// Consume a confirmation code and mark its owner verified.
    ///
    /// Unknown, superseded and already-used codes are indistinguishable.
    ///
    /// # Errors
    /// `MissingSecret` for blank input, `InvalidCode`, `ExpiredCode`, or `Infra`.
    #[instrument(skip(self, code))]
    pub async fn confirm(&self, code: &str) -> Result<(), CredentialError> {
        if code.trim().is_empty() {
            return Err(ValidationError::MissingSecret.into());
        }

        let result = self
            .issuer()
            .consume(
                self.store(),
                SecretPurpose::Confirmation,
                code,
                ConsumeEffect::VerifyEmail,
            )
            .await;

        match result {
            Ok(record) => {
                info!(user_id = %record.user_id, "email confirmed");
                Ok(())
            }
            Err(ConsumeError::NotFound | ConsumeError::AlreadyConsumed) => {
                debug!("confirmation rejected: invalid code");
                Err(CredentialError::InvalidCode)
            }
            Err(ConsumeError::Expired) => {
                debug!("confirmation rejected: expired code");
                Err(CredentialError::ExpiredCode)
            }
            Err(ConsumeError::Store(err)) => Err(infra("confirm", err)),
        }
    }

    /// Send a fresh confirmation code to an unverified account.
    ///
    /// Succeeds the same way whether or not the account exists, is already
    /// verified, or is inside the resend cooldown.
    ///
    /// # Errors
    /// Only `Infra`.
    #[instrument(skip(self))]
    pub async fn resend_confirmation(&self, email: &str) -> Result<(), CredentialError> {
        let outcome = self
            .resend_confirmation_inner(email)
            .await
            .map_err(|err| infra("resend_confirmation", err))?;
        debug!(?outcome, "confirmation resend handled");
        Ok(())
    }

    async fn resend_confirmation_inner(&self, email: &str) -> anyhow::Result<ResendOutcome> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(ResendOutcome::Noop);
        }
        let Some(user) = self.store().find_user_by_email(&email).await? else {
            return Ok(ResendOutcome::Noop);
        };
        if user.is_verified() {
            return Ok(ResendOutcome::Noop);
        }

        let latest = self
            .issuer()
            .latest_issued_at(self.store(), user.id, SecretPurpose::Confirmation)
            .await?;
        let cooldown = Duration::seconds(self.config().resend_cooldown_seconds());
        if latest.is_some_and(|created_at| created_at + cooldown > Utc::now()) {
            return Ok(ResendOutcome::Cooldown);
        }

        self.issuer()
            .issue(
                self.store(),
                &user,
                SecretPurpose::Confirmation,
                self.config().code_ttl_seconds(),
            )
            .await?;
        Ok(ResendOutcome::Queued)
    }
}
