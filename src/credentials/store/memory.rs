//! Process-local [`CredentialStore`] used by tests and embedders.
//!
//! All state sits behind one mutex and every trait call holds it for its whole
//! body, which gives the same all-or-nothing behavior as a transaction.

use std::collections::HashMap;
use std::future::ready;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{ConsumeEffect, ConsumeOutcome, CredentialStore, RegisterOutcome, StoreFuture};
use crate::credentials::models::{
    NewUser, NotificationJob, PendingSecret, SecretPurpose, SecretRecord, User,
};

#[derive(Debug)]
struct State {
    users: HashMap<Uuid, User>,
    emails: HashMap<String, Uuid>,
    secrets: Vec<SecretRecord>,
    outbox: Vec<NotificationJob>,
    outbox_available: bool,
}

impl State {
    fn enqueue(&mut self, job: NotificationJob) -> Result<()> {
        if !self.outbox_available {
            bail!("email outbox unavailable");
        }
        self.outbox.push(job);
        Ok(())
    }

    fn new_secret(user_id: Uuid, secret: PendingSecret, now: DateTime<Utc>) -> SecretRecord {
        SecretRecord {
            id: Uuid::new_v4(),
            user_id,
            purpose: secret.purpose,
            token_hash: secret.token_hash,
            expires_at: now + Duration::seconds(secret.ttl_seconds),
            consumed_at: None,
            created_at: now,
        }
    }

    fn invalidate_outstanding(&mut self, user_id: Uuid, purpose: SecretPurpose, now: DateTime<Utc>) {
        for record in self
            .secrets
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.purpose == purpose && r.consumed_at.is_none())
        {
            record.consumed_at = Some(now);
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                users: HashMap::new(),
                emails: HashMap::new(),
                secrets: Vec::new(),
                outbox: Vec::new(),
                outbox_available: true,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs enqueued so far, oldest first.
    #[must_use]
    pub fn queued_jobs(&self) -> Vec<NotificationJob> {
        self.state().outbox.clone()
    }

    /// Every secret issued to `user_id` for `purpose`, oldest first.
    #[must_use]
    pub fn secrets_for(&self, user_id: Uuid, purpose: SecretPurpose) -> Vec<SecretRecord> {
        self.state()
            .secrets
            .iter()
            .filter(|r| r.user_id == user_id && r.purpose == purpose)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.state().users.len()
    }

    /// Make enqueueing fail, which aborts the enclosing operation.
    pub fn set_outbox_available(&self, available: bool) {
        self.state().outbox_available = available;
    }

    fn create_user(
        &self,
        user: NewUser,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> Result<RegisterOutcome> {
        let mut state = self.state();
        if state.emails.contains_key(&user.email) {
            return Ok(RegisterOutcome::EmailTaken);
        }
        // Fail before any write so nothing is left behind.
        if !state.outbox_available {
            bail!("email outbox unavailable");
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            email_verified_at: None,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        let record = State::new_secret(created.id, secret, now);

        state.enqueue(job)?;
        state.secrets.push(record);
        state.emails.insert(created.email.clone(), created.id);
        state.users.insert(created.id, created.clone());
        Ok(RegisterOutcome::Created(created))
    }

    fn user_by_email(&self, email: &str) -> Option<User> {
        let state = self.state();
        state
            .emails
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned()
    }

    fn issue(
        &self,
        user_id: Uuid,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> Result<SecretRecord> {
        let mut state = self.state();
        if !state.users.contains_key(&user_id) {
            return Err(anyhow!("user {user_id} not found"));
        }
        let now = Utc::now();
        let purpose = secret.purpose;

        state.enqueue(job)?;
        state.invalidate_outstanding(user_id, purpose, now);
        let record = State::new_secret(user_id, secret, now);
        state.secrets.push(record.clone());
        Ok(record)
    }

    fn consume(
        &self,
        purpose: SecretPurpose,
        token_hash: &[u8],
        effect: ConsumeEffect,
    ) -> Result<ConsumeOutcome> {
        let mut state = self.state();
        let now = Utc::now();

        let Some(record) = state
            .secrets
            .iter_mut()
            .find(|r| r.purpose == purpose && r.token_hash == token_hash)
        else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if record.consumed_at.is_some() {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        if record.expires_at <= now {
            return Ok(ConsumeOutcome::Expired);
        }
        record.consumed_at = Some(now);
        let consumed = record.clone();

        let Some(user) = state.users.get_mut(&consumed.user_id) else {
            bail!("user {} not found", consumed.user_id);
        };
        match effect {
            ConsumeEffect::VerifyEmail => {
                if user.email_verified_at.is_none() {
                    user.email_verified_at = Some(now);
                }
                user.updated_at = now;
            }
            ConsumeEffect::ReplacePassword { password_hash } => {
                user.password_hash = password_hash;
                user.updated_at = now;
                state.invalidate_outstanding(consumed.user_id, SecretPurpose::PasswordReset, now);
            }
        }
        Ok(ConsumeOutcome::Consumed(consumed))
    }

    fn latest_created_at(&self, user_id: Uuid, purpose: SecretPurpose) -> Option<DateTime<Utc>> {
        self.state()
            .secrets
            .iter()
            .filter(|r| r.user_id == user_id && r.purpose == purpose)
            .map(|r| r.created_at)
            .max()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryStore {
    fn insert_user_with_secret<'a>(
        &'a self,
        user: NewUser,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, RegisterOutcome> {
        Box::pin(ready(self.create_user(user, secret, job)))
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(ready(Ok(self.user_by_email(email))))
    }

    fn issue_secret<'a>(
        &'a self,
        user_id: Uuid,
        secret: PendingSecret,
        job: NotificationJob,
    ) -> StoreFuture<'a, SecretRecord> {
        Box::pin(ready(self.issue(user_id, secret, job)))
    }

    fn consume_secret<'a>(
        &'a self,
        purpose: SecretPurpose,
        token_hash: &'a [u8],
        effect: ConsumeEffect,
    ) -> StoreFuture<'a, ConsumeOutcome> {
        Box::pin(ready(self.consume(purpose, token_hash, effect)))
    }

    fn latest_secret_created_at<'a>(
        &'a self,
        user_id: Uuid,
        purpose: SecretPurpose,
    ) -> StoreFuture<'a, Option<DateTime<Utc>>> {
        Box::pin(ready(Ok(self.latest_created_at(user_id, purpose))))
    }
}
