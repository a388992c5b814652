//! Small helpers for input normalization and validation.

use regex::Regex;

use super::error::ValidationError;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Check a new password against its confirmation and the length policy.
///
/// Length is counted in characters, not bytes.
pub(crate) fn validate_new_password(
    password: &str,
    confirm_password: &str,
    min_length: usize,
    max_length: usize,
) -> Result<(), ValidationError> {
    if password != confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }
    let length = password.chars().count();
    if length < min_length {
        return Err(ValidationError::PasswordTooShort { min: min_length });
    }
    if length > max_length {
        return Err(ValidationError::PasswordTooLong { max: max_length });
    }
    Ok(())
}
