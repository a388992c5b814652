//! `CredentialService`: the entry point the transport layer calls.
//!
//! The service owns the store handle, configuration, password hasher and secret
//! issuer. Operations live next to their flows (`register.rs`, `confirm.rs`,
//! `authenticate.rs`, `reset.rs`) as further `impl` blocks on this type.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::error;

use super::config::CredentialConfig;
use super::error::CredentialError;
use super::password::PasswordHasher;
use super::secrets::SecretIssuer;
use super::store::CredentialStore;

pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    config: CredentialConfig,
    hasher: Arc<PasswordHasher>,
    issuer: SecretIssuer,
}

impl CredentialService {
    /// Build the service.
    ///
    /// # Errors
    /// Returns an error if the pepper is empty or the password cost is invalid.
    pub fn new(store: Arc<dyn CredentialStore>, config: CredentialConfig) -> Result<Self> {
        if !config.has_pepper() {
            bail!("credential pepper must be configured");
        }
        let hasher = PasswordHasher::new(config.pepper().clone(), config.password_cost())
            .context("failed to initialize password hasher")?;
        let issuer = SecretIssuer::new(
            config.pepper().clone(),
            config.frontend_base_url().to_string(),
        );
        Ok(Self {
            store,
            config,
            hasher: Arc::new(hasher),
            issuer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    pub(super) fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(super) fn issuer(&self) -> &SecretIssuer {
        &self.issuer
    }

    /// Hash on the blocking pool.
    pub(super) async fn hash_password(&self, plaintext: &str) -> Result<String> {
        let hasher = Arc::clone(&self.hasher);
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .context("password hashing task failed")?
    }

    /// Verify against `hash`, or against the placeholder when there is no account.
    pub(super) async fn verify_password(&self, plaintext: &str, hash: Option<&str>) -> Result<bool> {
        let hasher = Arc::clone(&self.hasher);
        let plaintext = plaintext.to_string();
        let hash = hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&plaintext, &hash),
            None => {
                hasher.verify_placeholder(&plaintext);
                false
            }
        })
        .await
        .context("password verification task failed")
    }
}

/// Log an infrastructure failure with full context and wrap it for the caller.
pub(super) fn infra(operation: &'static str, err: anyhow::Error) -> CredentialError {
    error!(operation, "credential operation failed: {err:#}");
    CredentialError::Infra(err)
}
