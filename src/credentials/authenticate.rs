//! Password authentication.

use tracing::{debug, instrument};

use super::error::CredentialError;
use super::models::User;
use super::service::{infra, CredentialService};
use super::utils::normalize_email;

impl CredentialService {
    /// Check an email and password.
    ///
    /// Unknown accounts still pay for one Argon2 verification against a
    /// placeholder hash so they cannot be told apart by latency. The verified
    /// check runs only after the password matched.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown email or wrong password,
    /// `EmailNotVerified` for a correct password on an unconfirmed account,
    /// `Infra` for storage failures.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, CredentialError> {
        let email = normalize_email(email);
        let user = self
            .store()
            .find_user_by_email(&email)
            .await
            .map_err(|err| infra("authenticate", err))?;

        // No stored password can be longer than the ceiling.
        let within_ceiling = password.chars().count() <= self.config().max_password_length();
        let candidate = if within_ceiling { password } else { "" };

        let matched = self
            .verify_password(candidate, user.as_ref().map(|u| u.password_hash.as_str()))
            .await
            .map_err(|err| infra("authenticate", err))?;

        let Some(user) = user.filter(|_| matched && within_ceiling) else {
            debug!("authentication rejected: invalid credentials");
            return Err(CredentialError::InvalidCredentials);
        };
        if !user.is_verified() {
            debug!(user_id = %user.id, "authentication rejected: email not verified");
            return Err(CredentialError::EmailNotVerified);
        }

        debug!(user_id = %user.id, "authentication succeeded");
        Ok(user)
    }
}
