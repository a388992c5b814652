//! Issuing and consuming one-time secrets (verification codes, reset tokens).
//!
//! Flow Overview:
//! - `mint` draws a random secret and computes its lookup hash. Only the hash
//!   is persisted; the plaintext goes to the user through the outbox.
//! - `issue` writes the hash, invalidates every other outstanding secret of the
//!   same purpose for the user, and enqueues the delivery job, all in one
//!   storage transaction.
//! - `consume` marks the secret spent with a single conditional update and
//!   applies the caller's effect (verify email, replace password) in the same
//!   transaction.
//!
//! Security boundaries: the lookup hash is HMAC-SHA-256 keyed by the server
//! pepper. A leaked table of hashes cannot be matched against guessed codes
//! without the pepper.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::models::{NotificationJob, PendingSecret, SecretPurpose, SecretRecord, User};
use super::store::{ConsumeEffect, ConsumeOutcome, CredentialStore};

type HmacSha256 = Hmac<Sha256>;

/// Unambiguous uppercase alphabet for codes typed by hand (Crockford base32).
const CODE_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const CODE_LENGTH: usize = 10;
const TOKEN_BYTES: usize = 32;

/// Why a secret could not be consumed.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("secret not found")]
    NotFound,
    #[error("secret expired")]
    Expired,
    #[error("secret already consumed")]
    AlreadyConsumed,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A freshly minted secret: the plaintext for delivery and the row to store.
pub struct MintedSecret {
    pub plaintext: String,
    pub pending: PendingSecret,
}

pub struct SecretIssuer {
    key: SecretString,
    frontend_base_url: String,
}

impl SecretIssuer {
    #[must_use]
    pub fn new(key: SecretString, frontend_base_url: String) -> Self {
        Self {
            key,
            frontend_base_url,
        }
    }

    /// Draw a new random secret for `purpose`.
    ///
    /// Confirmation codes are short, typed by hand, and compared case-insensitively.
    /// Reset tokens travel in links and are 32 random bytes, base64url.
    ///
    /// # Errors
    /// Returns an error if the OS RNG fails.
    pub fn mint(&self, purpose: SecretPurpose, ttl_seconds: i64) -> Result<MintedSecret> {
        let plaintext = match purpose {
            SecretPurpose::Confirmation => generate_code()?,
            SecretPurpose::PasswordReset => generate_token()?,
        };
        let token_hash = self.hash(purpose, &plaintext)?;
        Ok(MintedSecret {
            plaintext,
            pending: PendingSecret {
                purpose,
                token_hash,
                ttl_seconds,
            },
        })
    }

    /// Keyed lookup hash for a plaintext secret, after normalizing user input.
    ///
    /// # Errors
    /// Returns an error if the HMAC cannot be keyed.
    pub fn hash(&self, purpose: SecretPurpose, plaintext: &str) -> Result<Vec<u8>> {
        let normalized = normalize_secret(purpose, plaintext);
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|err| anyhow!("failed to key secret hash: {err}"))?;
        mac.update(purpose.as_str().as_bytes());
        mac.update(b":");
        mac.update(normalized.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Build the job that delivers `plaintext` to `email`.
    #[must_use]
    pub fn job_for(&self, purpose: SecretPurpose, email: &str, plaintext: &str) -> NotificationJob {
        NotificationJob::for_secret(purpose, email, plaintext, &self.frontend_base_url)
    }

    /// Issue a secret for an existing user and enqueue its delivery.
    ///
    /// Outstanding secrets of the same purpose for the user are invalidated in
    /// the same transaction. Returns the plaintext for the caller and the stored record.
    ///
    /// # Errors
    /// Returns an error if minting, storage, or enqueueing fails; nothing is
    /// persisted in that case.
    pub async fn issue(
        &self,
        store: &dyn CredentialStore,
        user: &User,
        purpose: SecretPurpose,
        ttl_seconds: i64,
    ) -> Result<(String, SecretRecord)> {
        let minted = self.mint(purpose, ttl_seconds)?;
        let job = self.job_for(purpose, &user.email, &minted.plaintext);
        let record = store
            .issue_secret(user.id, minted.pending, job)
            .await
            .with_context(|| format!("failed to issue {purpose} secret"))?;
        debug!(user_id = %user.id, %purpose, "issued one-time secret");
        Ok((minted.plaintext, record))
    }

    /// Consume a secret by plaintext, applying `effect` atomically on success.
    ///
    /// # Errors
    /// `NotFound`, `Expired` or `AlreadyConsumed` when the secret cannot be
    /// spent, `Store` on infrastructure failure.
    pub async fn consume(
        &self,
        store: &dyn CredentialStore,
        purpose: SecretPurpose,
        plaintext: &str,
        effect: ConsumeEffect,
    ) -> Result<SecretRecord, ConsumeError> {
        let token_hash = self.hash(purpose, plaintext)?;
        match store.consume_secret(purpose, &token_hash, effect).await? {
            ConsumeOutcome::Consumed(record) => Ok(record),
            ConsumeOutcome::NotFound => Err(ConsumeError::NotFound),
            ConsumeOutcome::Expired => Err(ConsumeError::Expired),
            ConsumeOutcome::AlreadyConsumed => Err(ConsumeError::AlreadyConsumed),
        }
    }

    /// Creation time of the user's newest secret for `purpose`, used by resend cooldowns.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn latest_issued_at(
        &self,
        store: &dyn CredentialStore,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        store.latest_secret_created_at(user_id, purpose).await
    }
}

fn normalize_secret(purpose: SecretPurpose, plaintext: &str) -> String {
    let trimmed = plaintext.trim();
    match purpose {
        SecretPurpose::Confirmation => trimmed.to_ascii_uppercase(),
        SecretPurpose::PasswordReset => trimmed.to_string(),
    }
}

fn generate_code() -> Result<String> {
    let mut bytes = [0u8; CODE_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate verification code")?;
    // 32 symbols: masking to 5 bits keeps the distribution uniform.
    Ok(bytes
        .iter()
        .map(|byte| char::from(CODE_ALPHABET[usize::from(byte & 0x1f)]))
        .collect())
}

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn issuer(key: &str) -> SecretIssuer {
        SecretIssuer::new(SecretString::from(key), "https://latchkey.dev".to_string())
    }

    #[test]
    fn codes_use_the_code_alphabet() -> Result<()> {
        let code = generate_code()?;
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        Ok(())
    }

    #[test]
    fn tokens_decode_to_32_bytes() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(TOKEN_BYTES));
    }

    #[test]
    fn mint_hash_matches_rehash() -> Result<()> {
        let issuer = issuer("pepper");
        let minted = issuer.mint(SecretPurpose::PasswordReset, 60)?;
        assert_eq!(minted.pending.ttl_seconds, 60);
        assert_eq!(minted.pending.purpose, SecretPurpose::PasswordReset);
        assert_eq!(
            minted.pending.token_hash,
            issuer.hash(SecretPurpose::PasswordReset, &minted.plaintext)?
        );
        Ok(())
    }

    #[test]
    fn confirmation_hash_ignores_case_and_whitespace() -> Result<()> {
        let issuer = issuer("pepper");
        assert_eq!(
            issuer.hash(SecretPurpose::Confirmation, " abcde12345 ")?,
            issuer.hash(SecretPurpose::Confirmation, "ABCDE12345")?
        );
        Ok(())
    }

    #[test]
    fn reset_hash_is_case_sensitive() -> Result<()> {
        let issuer = issuer("pepper");
        assert_ne!(
            issuer.hash(SecretPurpose::PasswordReset, "abc")?,
            issuer.hash(SecretPurpose::PasswordReset, "ABC")?
        );
        Ok(())
    }

    #[test]
    fn hash_is_keyed_and_purpose_scoped() -> Result<()> {
        let a = issuer("pepper-a").hash(SecretPurpose::Confirmation, "CODE")?;
        let b = issuer("pepper-b").hash(SecretPurpose::Confirmation, "CODE")?;
        let reset = issuer("pepper-a").hash(SecretPurpose::PasswordReset, "CODE")?;
        assert_ne!(a, b);
        assert_ne!(a, reset);
        assert_eq!(a.len(), 32);
        Ok(())
    }
}
