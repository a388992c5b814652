use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PEPPER: &str = "pepper";
pub const ARG_SESSION_KEY: &str = "session-key";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_RESET_TTL_SECONDS: &str = "reset-ttl-seconds";
pub const ARG_RESEND_COOLDOWN_SECONDS: &str = "resend-cooldown-seconds";
pub const ARG_MIN_PASSWORD_LENGTH: &str = "min-password-length";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PEPPER)
                .long(ARG_PEPPER)
                .help("Server-wide secret mixed into password and code hashes")
                .env("LATCHKEY_PEPPER")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_KEY)
                .long(ARG_SESSION_KEY)
                .help("Base64-encoded 32-byte key used to seal session cookies")
                .env("LATCHKEY_SESSION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for confirmation and reset links")
                .env("LATCHKEY_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("Email confirmation code TTL in seconds")
                .env("LATCHKEY_CODE_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESET_TTL_SECONDS)
                .long(ARG_RESET_TTL_SECONDS)
                .help("Password reset token TTL in seconds")
                .env("LATCHKEY_RESET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESEND_COOLDOWN_SECONDS)
                .long(ARG_RESEND_COOLDOWN_SECONDS)
                .help("Cooldown before another confirmation code can be sent")
                .env("LATCHKEY_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_MIN_PASSWORD_LENGTH)
                .long(ARG_MIN_PASSWORD_LENGTH)
                .help("Minimum password length in characters")
                .env("LATCHKEY_MIN_PASSWORD_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("LATCHKEY_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

pub struct Options {
    pub pepper: SecretString,
    pub session_key: SecretString,
    pub frontend_base_url: String,
    pub code_ttl_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub min_password_length: usize,
    pub session_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let pepper = matches
            .get_one::<String>(ARG_PEPPER)
            .cloned()
            .context("missing required argument: --pepper")?;
        let session_key = matches
            .get_one::<String>(ARG_SESSION_KEY)
            .cloned()
            .context("missing required argument: --session-key")?;

        Ok(Self {
            pepper: SecretString::from(pepper),
            session_key: SecretString::from(session_key),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            code_ttl_seconds: matches
                .get_one::<i64>(ARG_CODE_TTL_SECONDS)
                .copied()
                .unwrap_or(900),
            reset_ttl_seconds: matches
                .get_one::<i64>(ARG_RESET_TTL_SECONDS)
                .copied()
                .unwrap_or(3600),
            resend_cooldown_seconds: matches
                .get_one::<i64>(ARG_RESEND_COOLDOWN_SECONDS)
                .copied()
                .unwrap_or(60),
            min_password_length: matches
                .get_one::<usize>(ARG_MIN_PASSWORD_LENGTH)
                .copied()
                .unwrap_or(8),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(604_800),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_apply() -> Result<()> {
        let matches = with_args(Command::new("latchkey")).try_get_matches_from(vec![
            "latchkey",
            "--pepper",
            "pepper",
            "--session-key",
            "key",
        ])?;
        let options = Options::parse(&matches)?;
        assert_eq!(options.pepper.expose_secret(), "pepper");
        assert_eq!(options.session_key.expose_secret(), "key");
        assert_eq!(options.frontend_base_url, "http://localhost:8080");
        assert_eq!(options.code_ttl_seconds, 900);
        assert_eq!(options.reset_ttl_seconds, 3600);
        assert_eq!(options.resend_cooldown_seconds, 60);
        assert_eq!(options.min_password_length, 8);
        assert_eq!(options.session_ttl_seconds, 604_800);
        Ok(())
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = with_args(Command::new("latchkey")).try_get_matches_from(vec![
            "latchkey",
            "--pepper",
            "pepper",
            "--session-key",
            "key",
            "--code-ttl-seconds",
            "0",
        ]);
        assert!(result.is_err());
    }
}
