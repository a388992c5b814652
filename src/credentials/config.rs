//! Credential configuration: pepper, secret lifetimes, and password policy.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

const DEFAULT_CODE_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_RESET_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
// Upper bound keeps a single login from pinning a core on Argon2.
const DEFAULT_MAX_PASSWORD_LENGTH: usize = 1024;
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:8080";

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordCost {
    /// Memory in KiB.
    pub m_cost: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Lanes.
    pub p_cost: u32,
}

impl PasswordCost {
    #[must_use]
    pub const fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self::new(
            argon2::Params::DEFAULT_M_COST,
            argon2::Params::DEFAULT_T_COST,
            argon2::Params::DEFAULT_P_COST,
        )
    }
}

#[derive(Clone)]
pub struct CredentialConfig {
    pepper: SecretString,
    frontend_base_url: String,
    code_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    min_password_length: usize,
    max_password_length: usize,
    password_cost: PasswordCost,
}

impl CredentialConfig {
    /// The pepper has no default; an empty pepper is rejected when the service is built.
    #[must_use]
    pub fn new(pepper: SecretString) -> Self {
        Self {
            pepper,
            frontend_base_url: DEFAULT_FRONTEND_BASE_URL.to_string(),
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            max_password_length: DEFAULT_MAX_PASSWORD_LENGTH,
            password_cost: PasswordCost::default(),
        }
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: String) -> Self {
        self.frontend_base_url = url;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_max_password_length(mut self, length: usize) -> Self {
        self.max_password_length = length;
        self
    }

    #[must_use]
    pub fn with_password_cost(mut self, cost: PasswordCost) -> Self {
        self.password_cost = cost;
        self
    }

    #[must_use]
    pub fn pepper(&self) -> &SecretString {
        &self.pepper
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn reset_ttl_seconds(&self) -> i64 {
        self.reset_ttl_seconds
    }

    #[must_use]
    pub fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn max_password_length(&self) -> usize {
        self.max_password_length
    }

    #[must_use]
    pub fn password_cost(&self) -> PasswordCost {
        self.password_cost
    }

    pub(super) fn has_pepper(&self) -> bool {
        !self.pepper.expose_secret().is_empty()
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("pepper", &"***")
            .field("frontend_base_url", &self.frontend_base_url)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("reset_ttl_seconds", &self.reset_ttl_seconds)
            .field("resend_cooldown_seconds", &self.resend_cooldown_seconds)
            .field("min_password_length", &self.min_password_length)
            .field("max_password_length", &self.max_password_length)
            .field("password_cost", &self.password_cost)
            .finish()
    }
}
