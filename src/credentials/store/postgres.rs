//! PostgreSQL implementation of [`CredentialStore`].
//!
//! Each trait call runs in its own transaction. Secrets live in one table per
//! purpose (`email_verification_codes`, `password_reset_tokens`) with a unique
//! `token_hash`; delivery jobs go to `email_outbox` in the same transaction so a
//! rollback never leaves an orphaned email behind.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    ConsumeEffect, ConsumeOutcome, CredentialStore, RegisterOutcome, StoreFuture,
};
use crate::credentials::models::{
    NewUser, NotificationJob, PendingSecret, SecretPurpose, SecretRecord, User,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, email_verified_at, is_admin, created_at, updated_at";
const SECRET_COLUMNS: &str = "id, user_id, token_hash, expires_at, consumed_at, created_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const fn secrets_table(purpose: SecretPurpose) -> &'static str {
    match purpose {
        SecretPurpose::Confirmation => "email_verification_codes",
        SecretPurpose::PasswordReset => "password_reset_tokens",
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified_at: row.get("email_verified_at"),
        is_admin: row.get("is_admin"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn secret_from_row(row: &PgRow, purpose: SecretPurpose) -> SecretRecord {
    SecretRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        purpose,
        token_hash: row.get("token_hash"),
        expires_at: row.get("expires_at"),
        consumed_at: row.get("consumed_at"),
        created_at: row.get("created_at"),
    }
}

async fn insert_user(tx: &mut Transaction<'_, Postgres>, user: &NewUser) -> Result<Option<User>> {
    // ON CONFLICT keeps a concurrent duplicate signup from aborting the transaction.
    let query = format!(
        r"
        INSERT INTO users (email, password_hash)
        VALUES ($1, $2)
        ON CONFLICT (email) DO NOTHING
        RETURNING {USER_COLUMNS}
    "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert user")?;
    Ok(row.as_ref().map(user_from_row))
}

async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<()> {
    // Serializes concurrent issues for the same user so only one secret stays outstanding.
    let query = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock user row")?;
    row.map(|_| ())
        .ok_or_else(|| anyhow!("user {user_id} not found"))
}

async fn invalidate_outstanding(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    purpose: SecretPurpose,
) -> Result<u64> {
    let query = format!(
        r"
        UPDATE {}
        SET consumed_at = NOW()
        WHERE user_id = $1
          AND consumed_at IS NULL
    ",
        secrets_table(purpose)
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let result = sqlx::query(&query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to invalidate outstanding {purpose} secrets"))?;
    Ok(result.rows_affected())
}

async fn insert_secret(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    secret: &PendingSecret,
) -> Result<SecretRecord> {
    let query = format!(
        r"
        INSERT INTO {}
            (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING {SECRET_COLUMNS}
    ",
        secrets_table(secret.purpose)
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(&secret.token_hash)
        .bind(secret.ttl_seconds)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to insert {} secret", secret.purpose))?;
    Ok(secret_from_row(&row, secret.purpose))
}

async fn enqueue_job(tx: &mut Transaction<'_, Postgres>, job: &NotificationJob) -> Result<()> {
    let payload_text =
        serde_json::to_string(&job.payload()).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(job.recipient())
        .bind(job.kind())
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

async fn classify_unconsumed(
    tx: &mut Transaction<'_, Postgres>,
    purpose: SecretPurpose,
    token_hash: &[u8],
) -> Result<ConsumeOutcome> {
    let query = format!(
        "SELECT consumed_at FROM {} WHERE token_hash = $1",
        secrets_table(purpose)
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to classify {purpose} secret"))?;

    // The conditional update already failed, so a present, unconsumed row is expired.
    Ok(match row {
        None => ConsumeOutcome::NotFound,
        Some(row) => {
            let consumed_at: Option<DateTime<Utc>> = row.get("consumed_at");
            if consumed_at.is_some() {
                ConsumeOutcome::AlreadyConsumed
            } else {
                ConsumeOutcome::Expired
            }
        }
    })
}

async fn apply_effect(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    effect: &ConsumeEffect,
) -> Result<()> {
    match effect {
        ConsumeEffect::VerifyEmail => {
            let query = r"
                UPDATE users
                SET email_verified_at = COALESCE(email_verified_at, NOW()),
                    updated_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(user_id)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to mark email verified")?;
        }
        ConsumeEffect::ReplacePassword { password_hash } => {
            let query = r"
                UPDATE users
                SET password_hash = $2,
                    updated_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(user_id)
                .bind(password_hash)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to replace password hash")?;

            invalidate_outstanding(tx, user_id, SecretPurpose::PasswordReset).await?;
        }
    }
    Ok(())
}

impl PgStore {
    async fn create_user(
        &self,
        user: NewUser,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> Result<RegisterOutcome> {
        // User, first secret and outbox row commit together or not at all.
        let mut tx = self.pool.begin().await.context("begin signup transaction")?;

        let Some(created) = insert_user(&mut tx, &user).await? else {
            let _ = tx.rollback().await;
            return Ok(RegisterOutcome::EmailTaken);
        };
        insert_secret(&mut tx, created.id, &secret).await?;
        enqueue_job(&mut tx, &job).await?;

        tx.commit().await.context("commit signup transaction")?;
        Ok(RegisterOutcome::Created(created))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn issue(
        &self,
        user_id: Uuid,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> Result<SecretRecord> {
        let mut tx = self.pool.begin().await.context("begin issue transaction")?;

        lock_user(&mut tx, user_id).await?;
        invalidate_outstanding(&mut tx, user_id, secret.purpose).await?;
        let record = insert_secret(&mut tx, user_id, &secret).await?;
        enqueue_job(&mut tx, &job).await?;

        tx.commit().await.context("commit issue transaction")?;
        Ok(record)
    }

    async fn consume(
        &self,
        purpose: SecretPurpose,
        token_hash: &[u8],
        effect: ConsumeEffect,
    ) -> Result<ConsumeOutcome> {
        let mut tx = self.pool.begin().await.context("begin consume transaction")?;

        // Only one concurrent caller can flip consumed_at from NULL.
        let query = format!(
            r"
            UPDATE {}
            SET consumed_at = NOW()
            WHERE token_hash = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING {SECRET_COLUMNS}
        ",
            secrets_table(purpose)
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .with_context(|| format!("failed to consume {purpose} secret"))?;

        let Some(row) = row else {
            let outcome = classify_unconsumed(&mut tx, purpose, token_hash).await?;
            tx.commit().await.context("commit consume noop")?;
            return Ok(outcome);
        };

        let record = secret_from_row(&row, purpose);
        apply_effect(&mut tx, record.user_id, &effect).await?;

        tx.commit().await.context("commit consume transaction")?;
        Ok(ConsumeOutcome::Consumed(record))
    }

    async fn latest_created_at(
        &self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = format!(
            "SELECT MAX(created_at) AS latest FROM {} WHERE user_id = $1",
            secrets_table(purpose)
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to load latest secret timestamp")?;
        Ok(row.get("latest"))
    }
}

impl CredentialStore for PgStore {
    fn insert_user_with_secret<'a>(
        &'a self,
        user: NewUser,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, RegisterOutcome> {
        Box::pin(self.create_user(user, secret, job))
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(self.user_by_email(email))
    }

    fn issue_secret<'a>(
        &'a self,
        user_id: Uuid,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, SecretRecord> {
        Box::pin(self.issue(user_id, secret, job))
    }

    fn consume_secret<'a>(
        &'a self,
        purpose: SecretPurpose,
        token_hash: &'a [u8],
        effect: ConsumeEffect,
    ) -> StoreFuture<'a, ConsumeOutcome> {
        Box::pin(self.consume(purpose, token_hash, effect))
    }

    fn latest_secret_created_at<'a>(
        &'a self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> StoreFuture<'a, Option<DateTime<Utc>>> {
        Box::pin(self.latest_created_at(user_id, purpose))
    }
}
