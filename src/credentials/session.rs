//! Session issuance: the sealed identity cookie handed to the transport layer.
//!
//! The cookie value is `base64url(nonce (12 bytes) || ChaCha20-Poly1305(claims))`
//! with the cookie name bound as associated data. Claims are a small JSON
//! document (`uid`, `adm`, `iat`). Nothing is stored server-side; expiry is
//! enforced from `iat` when the cookie is read.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::models::User;

pub const SESSION_COOKIE_NAME: &str = "latchkey_session";

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
// Tolerated clock skew for identities issued "in the future".
const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session key must be base64 encoding of {KEY_LEN} bytes")]
    InvalidKey,
    #[error("failed to generate session nonce")]
    Nonce,
    #[error("failed to encode session claims: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to seal session")]
    Seal,
}

/// Who is making the request, as far as the session cookie can tell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: Option<Uuid>,
    pub is_admin: bool,
    pub authenticated: bool,
    pub issued_at: Option<DateTime<Utc>>,
}

impl AuthenticatedIdentity {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            is_admin: false,
            authenticated: false,
            issued_at: None,
        }
    }
}

/// Result of a successful login, ready for the transport to send.
pub struct SessionArtifact {
    pub identity: AuthenticatedIdentity,
    pub cookie_value: String,
    pub set_cookie: String,
}

impl fmt::Debug for SessionArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionArtifact")
            .field("identity", &self.identity)
            .field("cookie_value", &"***")
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct Claims {
    uid: Uuid,
    adm: bool,
    iat: i64,
}

#[derive(Clone)]
pub struct SessionConfig {
    key: SecretString,
    ttl_seconds: i64,
    secure: bool,
}

impl SessionConfig {
    /// `key` is the base64 (standard alphabet) encoding of 32 random bytes.
    #[must_use]
    pub fn new(key: SecretString) -> Self {
        Self {
            key,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            secure: false,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("key", &"***")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("secure", &self.secure)
            .finish()
    }
}

pub struct SessionCodec {
    cipher: ChaCha20Poly1305,
    ttl_seconds: i64,
    secure: bool,
}

impl SessionCodec {
    /// # Errors
    /// Returns `InvalidKey` unless the key decodes to exactly 32 bytes.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let key = STANDARD
            .decode(config.key.expose_secret().trim())
            .map_err(|_| SessionError::InvalidKey)?;
        Self::from_key_bytes(&key, config.ttl_seconds, config.secure)
    }

    /// # Errors
    /// Returns `InvalidKey` unless `key` is exactly 32 bytes.
    #[allow(deprecated)]
    pub fn from_key_bytes(key: &[u8], ttl_seconds: i64, secure: bool) -> Result<Self, SessionError> {
        if key.len() != KEY_LEN {
            return Err(SessionError::InvalidKey);
        }
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            ttl_seconds,
            secure,
        })
    }

    /// Issue the authenticated identity for `user` and its cookie.
    ///
    /// # Errors
    /// Returns an error if the RNG or the cipher fails.
    pub fn create_session(&self, user: &User) -> Result<SessionArtifact, SessionError> {
        let issued_at = Utc::now();
        let claims = Claims {
            uid: user.id,
            adm: user.is_admin,
            iat: issued_at.timestamp(),
        };
        let cookie_value = self.seal(&serde_json::to_vec(&claims)?)?;
        let set_cookie = self.cookie_directive(&cookie_value, self.ttl_seconds);
        debug!(user_id = %user.id, "session issued");

        Ok(SessionArtifact {
            identity: AuthenticatedIdentity {
                user_id: Some(user.id),
                is_admin: user.is_admin,
                authenticated: true,
                issued_at: DateTime::from_timestamp(claims.iat, 0),
            },
            cookie_value,
            set_cookie,
        })
    }

    /// `Set-Cookie` directive that clears the session cookie.
    #[must_use]
    pub fn destroy_session(&self) -> String {
        self.cookie_directive("", 0)
    }

    /// Decode a raw cookie value. Anything invalid, tampered or expired is anonymous.
    #[must_use]
    pub fn read_identity(&self, raw: Option<&str>) -> AuthenticatedIdentity {
        raw.and_then(|value| self.open(value))
            .and_then(|claims| self.identity_from_claims(&claims, Utc::now()))
            .unwrap_or_else(AuthenticatedIdentity::anonymous)
    }

    /// Same as [`read_identity`](Self::read_identity), given a whole `Cookie` header.
    #[must_use]
    pub fn read_identity_from_header(&self, cookie_header: Option<&str>) -> AuthenticatedIdentity {
        self.read_identity(cookie_header.and_then(session_cookie_value))
    }

    fn identity_from_claims(&self, claims: &Claims, now: DateTime<Utc>) -> Option<AuthenticatedIdentity> {
        let age = now.timestamp() - claims.iat;
        if age >= self.ttl_seconds || age < -MAX_CLOCK_SKEW_SECONDS {
            return None;
        }
        Some(AuthenticatedIdentity {
            user_id: Some(claims.uid),
            is_admin: claims.adm,
            authenticated: true,
            issued_at: DateTime::from_timestamp(claims.iat, 0),
        })
    }

    #[allow(deprecated)]
    fn seal(&self, plaintext: &[u8]) -> Result<String, SessionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| SessionError::Nonce)?;
        let payload = Payload {
            msg: plaintext,
            aad: SESSION_COOKIE_NAME.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|_| SessionError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    #[allow(deprecated)]
    fn open(&self, value: &str) -> Option<Claims> {
        let sealed = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
        if sealed.len() <= NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: SESSION_COOKIE_NAME.as_bytes(),
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .ok()?;
        serde_json::from_slice(&plaintext).ok()
    }

    fn cookie_directive(&self, value: &str, max_age: i64) -> String {
        let mut directive = format!(
            "{SESSION_COOKIE_NAME}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax"
        );
        if self.secure {
            directive.push_str("; Secure");
        }
        directive
    }
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("cipher", &"***")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("secure", &self.secure)
            .finish()
    }
}

fn session_cookie_value(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE_NAME).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(is_admin: bool) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "hash".to_string(),
            email_verified_at: Some(now),
            is_admin,
            created_at: now,
            updated_at: now,
        }
    }

    fn codec(secure: bool) -> Result<SessionCodec, SessionError> {
        SessionCodec::from_key_bytes(&[7u8; KEY_LEN], 3600, secure)
    }

    #[test]
    fn created_session_reads_back() -> anyhow::Result<()> {
        let codec = codec(false)?;
        let user = user(true);
        let artifact = codec.create_session(&user)?;

        assert!(artifact.identity.authenticated);
        assert_eq!(artifact.identity.user_id, Some(user.id));
        assert!(artifact.identity.is_admin);

        let identity = codec.read_identity(Some(&artifact.cookie_value));
        assert_eq!(identity, artifact.identity);
        Ok(())
    }

    #[test]
    fn set_cookie_flags() -> anyhow::Result<()> {
        let artifact = codec(true)?.create_session(&user(false))?;
        assert!(artifact
            .set_cookie
            .starts_with(&format!("{SESSION_COOKIE_NAME}={}", artifact.cookie_value)));
        for flag in ["HttpOnly", "SameSite=Lax", "Path=/", "Max-Age=3600", "Secure"] {
            assert!(artifact.set_cookie.contains(flag), "missing {flag}");
        }
        let plain = codec(false)?.create_session(&user(false))?;
        assert!(!plain.set_cookie.contains("Secure"));
        Ok(())
    }

    #[test]
    fn destroy_expires_cookie() -> anyhow::Result<()> {
        let directive = codec(false)?.destroy_session();
        assert!(directive.starts_with(&format!("{SESSION_COOKIE_NAME}=;")));
        assert!(directive.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn garbage_and_tampering_are_anonymous() -> anyhow::Result<()> {
        let codec = codec(false)?;
        let anonymous = AuthenticatedIdentity::anonymous();
        assert_eq!(codec.read_identity(None), anonymous);
        assert_eq!(codec.read_identity(Some("")), anonymous);
        assert_eq!(codec.read_identity(Some("not base64 !!")), anonymous);
        assert_eq!(codec.read_identity(Some("AAAA")), anonymous);

        let artifact = codec.create_session(&user(false))?;
        let mut bytes = URL_SAFE_NO_PAD.decode(&artifact.cookie_value)?;
        if let Some(last) = bytes.last_mut() {
            *last ^= 0x01;
        }
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert_eq!(codec.read_identity(Some(&tampered)), anonymous);
        Ok(())
    }

    #[test]
    fn other_key_cannot_open() -> anyhow::Result<()> {
        let artifact = codec(false)?.create_session(&user(false))?;
        let other = SessionCodec::from_key_bytes(&[8u8; KEY_LEN], 3600, false)?;
        assert!(!other.read_identity(Some(&artifact.cookie_value)).authenticated);
        Ok(())
    }

    #[test]
    fn expired_identity_is_anonymous() -> anyhow::Result<()> {
        let codec = codec(false)?;
        let now = Utc::now();
        let claims = Claims {
            uid: Uuid::new_v4(),
            adm: false,
            iat: (now - Duration::seconds(3600)).timestamp(),
        };
        assert!(codec.identity_from_claims(&claims, now).is_none());

        let fresh = Claims {
            iat: (now - Duration::seconds(10)).timestamp(),
            ..claims
        };
        assert!(codec.identity_from_claims(&fresh, now).is_some());

        let future = Claims {
            iat: (now + Duration::seconds(3600)).timestamp(),
            ..fresh
        };
        assert!(codec.identity_from_claims(&future, now).is_none());
        Ok(())
    }

    #[test]
    fn reads_from_cookie_header() -> anyhow::Result<()> {
        let codec = codec(false)?;
        let artifact = codec.create_session(&user(false))?;
        let header = format!("theme=dark; {SESSION_COOKIE_NAME}={}; other=1", artifact.cookie_value);
        assert!(codec.read_identity_from_header(Some(&header)).authenticated);
        assert!(!codec.read_identity_from_header(Some("theme=dark")).authenticated);
        assert!(!codec.read_identity_from_header(None).authenticated);
        Ok(())
    }

    #[test]
    fn config_key_must_be_32_bytes() {
        let short = SessionConfig::new(SecretString::from(STANDARD.encode([1u8; 16])));
        assert!(matches!(SessionCodec::new(&short), Err(SessionError::InvalidKey)));
        let not_base64 = SessionConfig::new(SecretString::from("***"));
        assert!(SessionCodec::new(&not_base64).is_err());
        let good = SessionConfig::new(SecretString::from(STANDARD.encode([1u8; KEY_LEN])))
            .with_ttl_seconds(60)
            .with_secure(true);
        assert!(SessionCodec::new(&good).is_ok());
        assert!(!format!("{good:?}").contains(&STANDARD.encode([1u8; KEY_LEN])));
    }
}
