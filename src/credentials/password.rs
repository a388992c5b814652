//! Peppered Argon2id password hashing.
//!
//! The pepper is fed to Argon2 as its keyed `secret` input, so it never appears
//! in the PHC string that lands in the database. A leaked `users` table alone
//! cannot be brute-forced without it. Salt and cost parameters are embedded in
//! the PHC string, so verification needs no side storage.

use anyhow::{anyhow, bail, Context, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as _, PasswordVerifier as _, Version,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

use super::config::PasswordCost;

// Hashed once at startup so unknown-account logins pay the same verify cost.
const PLACEHOLDER_PASSWORD: &str = "latchkey-placeholder-password";

pub struct PasswordHasher {
    pepper: SecretString,
    params: Params,
    placeholder_hash: String,
}

impl PasswordHasher {
    /// Build a hasher and precompute the placeholder hash.
    ///
    /// # Errors
    /// Returns an error for an empty pepper, invalid cost parameters, or if the
    /// placeholder cannot be hashed.
    pub fn new(pepper: SecretString, cost: PasswordCost) -> Result<Self> {
        if pepper.expose_secret().is_empty() {
            bail!("password pepper must not be empty");
        }
        let params = Params::new(cost.m_cost, cost.t_cost, cost.p_cost, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        let mut hasher = Self {
            pepper,
            params,
            placeholder_hash: String::new(),
        };
        hasher.placeholder_hash = hasher
            .hash(PLACEHOLDER_PASSWORD)
            .context("failed to hash placeholder password")?;
        Ok(hasher)
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|err| anyhow!("failed to initialize argon2: {err}"))
    }

    /// Hash a plaintext password with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if the OS RNG fails or Argon2 rejects the input.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let mut salt_bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .context("failed to generate password salt")?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| anyhow!("failed to encode password salt: {err}"))?;

        self.argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    }

    /// Constant-time verification. Any parse or primitive error counts as a mismatch.
    #[must_use]
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        let Ok(argon2) = self.argon2() else {
            return false;
        };
        argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }

    /// Spend one verification against the placeholder hash and discard the result.
    pub fn verify_placeholder(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.placeholder_hash);
    }
}

#[cfg(test)]
pub(crate) fn test_cost() -> PasswordCost {
    PasswordCost::new(1024, 1, 1)
}
