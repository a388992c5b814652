//! Notification outbox worker and delivery abstractions.
//!
//! Registration, resend and reset requests enqueue rows in `email_outbox` inside
//! the same transaction that writes the secret they carry. A background task
//! polls the table, locks a batch with `FOR UPDATE SKIP LOCKED`, renders each row
//! into an [`EmailMessage`] and hands it to an [`EmailSender`]. Rows end up
//! `sent`, go back to `pending` with a backoff, or become `failed` once
//! `max_attempts` is reached.
//!
//! `LogEmailSender` is the only sender shipped; it writes messages to the log
//! and is meant for local development.
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub subject: String,
    pub body: String,
}

impl std::fmt::Debug for EmailMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailMessage")
            .field("to_email", &self.to_email)
            .field("template", &self.template)
            .field("subject", &self.subject)
            .field("body", &"***")
            .finish()
    }
}

impl EmailMessage {
    /// Render an outbox row into a deliverable message.
    ///
    /// # Errors
    /// Returns an error for unknown templates or payloads missing a field.
    pub fn render(to_email: String, template: &str, payload_json: &str) -> Result<Self> {
        let payload: Value =
            serde_json::from_str(payload_json).context("invalid email payload JSON")?;
        let field = |name: &str| -> Result<String> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("email payload is missing `{name}`"))
        };

        let (subject, body) = match template {
            "confirmation_email" => {
                let code = field("code")?;
                let confirm_url = field("confirm_url")?;
                (
                    "Confirm your email address".to_string(),
                    format!(
                        "Your confirmation code is {code}\n\nEnter it at {confirm_url} to activate your account."
                    ),
                )
            }
            "reset_email" => {
                let reset_url = field("reset_url")?;
                (
                    "Reset your password".to_string(),
                    format!(
                        "Someone asked to reset the password for this account.\n\nFollow {reset_url} to choose a new one. If it wasn't you, ignore this message."
                    ),
                )
            }
            other => return Err(anyhow!("unknown email template: {other}")),
        };

        Ok(Self {
            to_email,
            template: template.to_string(),
            subject,
            body,
        })
    }
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Development sender that logs messages instead of delivering them.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = %message.subject,
            "email outbox send stub"
        );
        debug!(body = %message.body, "email outbox body");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// 5s poll interval, 10 messages per batch, 5 attempts and a 5s to 5m
    /// exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Clamp zero values to something the worker can run with.
    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and drains the outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            match process_outbox_batch(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "email outbox batch processed"),
                Err(err) => error!("email outbox batch failed: {err:#}"),
            }

            sleep(poll_interval).await;
        }
    })
}

/// Process one batch of due rows and return how many were handled.
///
/// # Errors
/// Returns an error if the batch cannot be loaded or its status updates fail.
pub async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let template: String = row.get("template");
        let payload_json: String = row.get("payload_json");

        let send_result = EmailMessage::render(row.get("to_email"), &template, &payload_json)
            .and_then(|message| sender.send(&message));
        if let Err(err) = &send_result {
            error!(%id, template, attempts, "email delivery failed: {err:#}");
        }
        update_outbox_status(&mut tx, id, attempts, send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

/// Where a row goes after a delivery attempt.
#[derive(Debug, PartialEq, Eq)]
enum NextStatus {
    Sent,
    Failed,
    Retry(Duration),
}

fn next_status(attempt: u32, delivered: bool, config: &EmailWorkerConfig) -> NextStatus {
    if delivered {
        NextStatus::Sent
    } else if attempt >= config.max_attempts() {
        NextStatus::Failed
    } else {
        NextStatus::Retry(backoff_delay(
            attempt,
            config.backoff_base(),
            config.backoff_max(),
        ))
    }
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &EmailWorkerConfig,
) -> Result<()> {
    let attempt = attempts.saturating_add(1);
    let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);
    let last_error = send_result.as_ref().err().map(|err| format!("{err:#}"));

    match next_status(attempt, send_result.is_ok(), config) {
        NextStatus::Sent => {
            let query = r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW(),
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(attempt_i32)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to sent")?;
        }
        NextStatus::Failed => {
            let query = r"
                UPDATE email_outbox
                SET status = 'failed',
                    attempts = $2,
                    last_error = $3,
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(attempt_i32)
                .bind(last_error)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to failed")?;
        }
        NextStatus::Retry(delay) => {
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            let query = r"
                UPDATE email_outbox
                SET status = 'pending',
                    attempts = $2,
                    last_error = $3,
                    next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(attempt_i32)
                .bind(last_error)
                .bind(delay_ms)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox retry schedule")?;
        }
    }

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

// Full delay lands somewhere in [delay/2, delay].
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{NotificationJob, SecretPurpose};

    #[test]
    fn normalize_clamps_zero_values() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        for attempt in 1..=10u32 {
            let delay = backoff_delay(attempt, base, max);
            let shift = attempt.saturating_sub(1);
            let uncapped = base.saturating_mul(1u32 << shift);
            let ceiling = uncapped.min(max);
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} too small");
        }
    }

    #[test]
    fn jitter_leaves_tiny_delays_alone() {
        assert_eq!(jitter_delay(Duration::from_millis(1)), Duration::from_millis(1));
        assert_eq!(jitter_delay(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn status_transitions_follow_attempt_budget() {
        let config = EmailWorkerConfig::new().with_max_attempts(3);
        assert_eq!(next_status(1, true, &config), NextStatus::Sent);
        assert!(matches!(next_status(1, false, &config), NextStatus::Retry(_)));
        assert!(matches!(next_status(2, false, &config), NextStatus::Retry(_)));
        assert_eq!(next_status(3, false, &config), NextStatus::Failed);
    }

    #[test]
    fn renders_confirmation_from_job_payload() -> Result<()> {
        let job = NotificationJob::for_secret(
            SecretPurpose::Confirmation,
            "a@x.com",
            "ABCDE12345",
            "https://latchkey.dev",
        );
        let message = EmailMessage::render(
            job.recipient().to_string(),
            job.kind(),
            &serde_json::to_string(&job.payload())?,
        )?;
        assert_eq!(message.subject, "Confirm your email address");
        assert!(message.body.contains("ABCDE12345"));
        assert!(message.body.contains("https://latchkey.dev/confirmations/new"));
        assert!(!format!("{message:?}").contains("ABCDE12345"));
        Ok(())
    }

    #[test]
    fn renders_reset_link() -> Result<()> {
        let job = NotificationJob::for_secret(
            SecretPurpose::PasswordReset,
            "a@x.com",
            "tok",
            "https://latchkey.dev",
        );
        let message = EmailMessage::render(
            job.recipient().to_string(),
            job.kind(),
            &serde_json::to_string(&job.payload())?,
        )?;
        assert_eq!(message.subject, "Reset your password");
        assert!(message.body.contains("https://latchkey.dev/reset-password/tok"));
        Ok(())
    }

    #[test]
    fn render_rejects_unknown_template_and_missing_fields() {
        assert!(EmailMessage::render("a@x.com".into(), "newsletter", "{}").is_err());
        assert!(EmailMessage::render("a@x.com".into(), "reset_email", "{}").is_err());
        assert!(EmailMessage::render("a@x.com".into(), "reset_email", "not json").is_err());
    }

    #[test]
    fn log_sender_accepts_messages() -> Result<()> {
        let message = EmailMessage::render(
            "a@x.com".into(),
            "reset_email",
            r#"{"reset_url":"https://latchkey.dev/reset-password/tok"}"#,
        )?;
        LogEmailSender.send(&message)
    }
}
