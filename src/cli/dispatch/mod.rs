//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action that starts the credential
//! service with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{credentials, outbox, ARG_DSN, ARG_MIGRATE, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let migrate = matches.get_flag(ARG_MIGRATE);

    let credential_opts = credentials::Options::parse(matches)?;
    let outbox_opts = outbox::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        migrate,
        pepper: credential_opts.pepper,
        session_key: credential_opts.session_key,
        frontend_base_url: credential_opts.frontend_base_url,
        code_ttl_seconds: credential_opts.code_ttl_seconds,
        reset_ttl_seconds: credential_opts.reset_ttl_seconds,
        resend_cooldown_seconds: credential_opts.resend_cooldown_seconds,
        min_password_length: credential_opts.min_password_length,
        session_ttl_seconds: credential_opts.session_ttl_seconds,
        email_outbox_poll_seconds: outbox_opts.poll_seconds,
        email_outbox_batch_size: outbox_opts.batch_size,
        email_outbox_max_attempts: outbox_opts.max_attempts,
        email_outbox_backoff_base_seconds: outbox_opts.backoff_base_seconds,
        email_outbox_backoff_max_seconds: outbox_opts.backoff_max_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                (
                    "LATCHKEY_DSN",
                    Some("postgres://user@localhost:5432/latchkey"),
                ),
                ("LATCHKEY_PEPPER", Some("pepper")),
                ("LATCHKEY_SESSION_KEY", Some("c2Vzc2lvbi1rZXk=")),
                ("LATCHKEY_FRONTEND_BASE_URL", Some("https://app.latchkey.dev")),
                ("LATCHKEY_RESET_TTL_SECONDS", Some("1800")),
                ("LATCHKEY_PORT", None),
                ("LATCHKEY_MIGRATE", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["latchkey"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert!(!args.migrate);
                    assert_eq!(args.pepper.expose_secret(), "pepper");
                    assert_eq!(args.frontend_base_url, "https://app.latchkey.dev");
                    assert_eq!(args.reset_ttl_seconds, 1800);
                    assert_eq!(args.code_ttl_seconds, 900);
                    assert_eq!(args.email_outbox_max_attempts, 5);
                }
            },
        );
    }

    #[test]
    fn args_debug_hides_secrets() {
        temp_env::with_vars(
            [
                ("LATCHKEY_DSN", Some("postgres://user:hunter2@db/latchkey")),
                ("LATCHKEY_PEPPER", Some("super-secret-pepper")),
                ("LATCHKEY_SESSION_KEY", Some("super-secret-key")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["latchkey"]);
                if let Ok(action) = handler(&matches) {
                    let rendered = format!("{action:?}");
                    assert!(!rendered.contains("super-secret-pepper"));
                    assert!(!rendered.contains("super-secret-key"));
                    assert!(!rendered.contains("hunter2"));
                } else {
                    panic!("handler failed");
                }
            },
        );
    }
}
