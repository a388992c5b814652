use crate::{
    api,
    credentials::{CredentialConfig, SessionConfig},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::fmt;
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub migrate: bool,
    pub pepper: SecretString,
    pub session_key: SecretString,
    pub frontend_base_url: String,
    pub code_ttl_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub min_password_length: usize,
    pub session_ttl_seconds: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &redact_dsn(&self.dsn))
            .field("migrate", &self.migrate)
            .field("pepper", &"[redacted]")
            .field("session_key", &"[redacted]")
            .field("frontend_base_url", &self.frontend_base_url)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("reset_ttl_seconds", &self.reset_ttl_seconds)
            .field("resend_cooldown_seconds", &self.resend_cooldown_seconds)
            .field("min_password_length", &self.min_password_length)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("email_outbox_poll_seconds", &self.email_outbox_poll_seconds)
            .field("email_outbox_batch_size", &self.email_outbox_batch_size)
            .field("email_outbox_max_attempts", &self.email_outbox_max_attempts)
            .finish_non_exhaustive()
    }
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "[unparseable]".to_string(),
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the frontend URL is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let frontend = Url::parse(&args.frontend_base_url).context("invalid frontend base URL")?;
    let secure_cookies = frontend.scheme() == "https";

    let credential_config = CredentialConfig::new(args.pepper)
        .with_frontend_base_url(args.frontend_base_url)
        .with_code_ttl_seconds(args.code_ttl_seconds)
        .with_reset_ttl_seconds(args.reset_ttl_seconds)
        .with_resend_cooldown_seconds(args.resend_cooldown_seconds)
        .with_min_password_length(args.min_password_length);

    let session_config = SessionConfig::new(args.session_key)
        .with_ttl_seconds(args.session_ttl_seconds)
        .with_secure(secure_cookies);

    let email_config = api::email::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(
        args.port,
        args.dsn,
        args.migrate,
        credential_config,
        session_config,
        email_config,
    )
    .await
}
