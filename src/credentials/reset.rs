//! Password reset: request a token by email, then redeem it with a new password.

use tracing::{debug, info, instrument};

use super::error::{CredentialError, ValidationError};
use super::models::SecretPurpose;
use super::secrets::ConsumeError;
use super::service::{infra, CredentialService};
use super::store::ConsumeEffect;
use super::utils::{normalize_email, valid_email, validate_new_password};

impl CredentialService {
    /// Start a password reset for `email`.
    ///
    /// Always returns `Ok(())` for well-formed and malformed input alike, and
    /// whether or not an account exists. Callers show
    /// [`RESET_REQUESTED_MESSAGE`](super::error::RESET_REQUESTED_MESSAGE).
    ///
    /// # Errors
    /// Only `Infra`.
    #[instrument(skip(self))]
    pub async fn request_reset(&self, email: &str) -> Result<(), CredentialError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            debug!("reset request ignored: malformed email");
            return Ok(());
        }

        let user = self
            .store()
            .find_user_by_email(&email)
            .await
            .map_err(|err| infra("request_reset", err))?;
        let Some(user) = user else {
            debug!("reset request ignored: unknown email");
            return Ok(());
        };

        self.issuer()
            .issue(
                self.store(),
                &user,
                SecretPurpose::PasswordReset,
                self.config().reset_ttl_seconds(),
            )
            .await
            .map_err(|err| infra("request_reset", err))?;
        info!(user_id = %user.id, "password reset requested");
        Ok(())
    }

    /// Redeem a reset token and replace the password.
    ///
    /// The token is consumed, the hash replaced and the user's other reset
    /// tokens invalidated in one transaction.
    ///
    /// # Errors
    /// Validation errors for the new password or a blank token,
    /// `InvalidResetCode`, `ExpiredResetCode`, or `Infra`.
    #[instrument(skip(self, token, password, confirm_password))]
    pub async fn update_reset(
        &self,
        token: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), CredentialError> {
        if token.trim().is_empty() {
            return Err(ValidationError::MissingSecret.into());
        }
        validate_new_password(
            password,
            confirm_password,
            self.config().min_password_length(),
            self.config().max_password_length(),
        )?;

        // Hash first: a hashing failure must not burn the token.
        let password_hash = self
            .hash_password(password)
            .await
            .map_err(|err| infra("update_reset", err))?;

        let result = self
            .issuer()
            .consume(
                self.store(),
                SecretPurpose::PasswordReset,
                token,
                ConsumeEffect::ReplacePassword { password_hash },
            )
            .await;

        match result {
            Ok(record) => {
                info!(user_id = %record.user_id, "password reset completed");
                Ok(())
            }
            Err(ConsumeError::NotFound | ConsumeError::AlreadyConsumed) => {
                debug!("password reset rejected: invalid token");
                Err(CredentialError::InvalidResetCode)
            }
            Err(ConsumeError::Expired) => {
                debug!("password reset rejected: expired token");
                Err(CredentialError::ExpiredResetCode)
            }
            Err(ConsumeError::Store(err)) => Err(infra("update_reset", err)),
        }
    }
}
