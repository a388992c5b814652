//! Registration: create an unverified user and send the first confirmation code.

use tracing::{debug, info, instrument};

use super::error::{CredentialError, ValidationError};
use super::models::{NewUser, SecretPurpose, User};
use super::service::{infra, CredentialService};
use super::store::RegisterOutcome;
use super::utils::{normalize_email, valid_email, validate_new_password};

impl CredentialService {
    /// Register a new account.
    ///
    /// The user row, its confirmation code and the confirmation email job are
    /// written in a single transaction.
    ///
    /// # Errors
    /// Validation errors for bad input, `EmailTaken` for an existing account,
    /// `Infra` for hashing or storage failures.
    #[instrument(skip(self, password, confirm_password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<User, CredentialError> {
        validate_new_password(
            password,
            confirm_password,
            self.config().min_password_length(),
            self.config().max_password_length(),
        )?;
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(ValidationError::InvalidEmail.into());
        }

        let password_hash = self
            .hash_password(password)
            .await
            .map_err(|err| infra("register", err))?;
        let minted = self
            .issuer()
            .mint(SecretPurpose::Confirmation, self.config().code_ttl_seconds())
            .map_err(|err| infra("register", err))?;
        let job = self
            .issuer()
            .job_for(SecretPurpose::Confirmation, &email, &minted.plaintext);

        let outcome = self
            .store()
            .insert_user_with_secret(
                NewUser {
                    email,
                    password_hash,
                },
                minted.pending,
                job,
            )
            .await
            .map_err(|err| infra("register", err))?;

        match outcome {
            RegisterOutcome::Created(user) => {
                info!(user_id = %user.id, "user registered");
                Ok(user)
            }
            RegisterOutcome::EmailTaken => {
                debug!("registration rejected: email taken");
                Err(CredentialError::EmailTaken)
            }
        }
    }
}
