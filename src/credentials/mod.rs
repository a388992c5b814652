//! Credential and verification lifecycle.
//!
//! Flow Overview:
//! 1. `register` creates an unverified user and enqueues a confirmation code.
//! 2. `confirm` redeems the code and stamps `email_verified_at`.
//! 3. `authenticate` checks the peppered Argon2id hash, then the verified flag.
//! 4. `request_reset` / `update_reset` replace a forgotten password through a
//!    one-time token delivered by email.
//! 5. `SessionCodec` turns an authenticated user into a sealed cookie and back.
//!
//! Every secret is single-use and expiring, and at most one per purpose is
//! outstanding for a user at any time.

mod authenticate;
pub mod config;
mod confirm;
pub mod error;
pub mod models;
pub mod password;
mod register;
mod reset;
pub mod secrets;
pub mod service;
pub mod session;
pub mod store;
mod utils;


pub use config::{CredentialConfig, PasswordCost};
pub use error::{CredentialError, ErrorClass, ValidationError, RESET_REQUESTED_MESSAGE};
pub use models::{NotificationJob, SecretPurpose, SecretRecord, User};
pub use service::CredentialService;
pub use session::{
    AuthenticatedIdentity, SessionArtifact, SessionCodec, SessionConfig, SessionError,
    SESSION_COOKIE_NAME,
};
pub use store::{CredentialStore, MemoryStore, PgStore};
