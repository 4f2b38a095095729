//! Signup input validation
//!
//! Usernames are 3-32 characters from `[A-Za-z0-9_]`. Passwords must be at
//! least 9 characters and contain an uppercase letter, a lowercase letter,
//! and a digit.

use crate::error::{Error, Result};

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 9;

/// Username bounds
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;

/// Validate a username against the charset and length rules
pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN || len > MAX_USERNAME_LEN {
        return Err(Error::InvalidRequest(format!(
            "username must be {}-{} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidRequest(
            "username may only contain letters, digits, and underscores".to_string(),
        ));
    }
    Ok(())
}

/// Validate a password against the strength policy
pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(Error::InvalidRequest(
            "password must contain an uppercase letter, a lowercase letter, and a digit"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_usernames() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("Alice_99").is_ok());
        assert!(validate_username(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn rejects_bad_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("  ").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("emoji🦀").is_err());
        assert!(validate_username("dash-ed").is_err());
    }

    #[test]
    fn password_length_boundary() {
        // Exactly 8: too short even with all classes present
        assert!(validate_password("Abcdef12").is_err());
        // Exactly 9: accepted
        assert!(validate_password("Abcdef123").is_ok());
    }

    #[test]
    fn password_requires_each_character_class() {
        assert!(validate_password("abcdef123").is_err()); // no upper
        assert!(validate_password("ABCDEF123").is_err()); // no lower
        assert!(validate_password("Abcdefghi").is_err()); // no digit
        assert!(validate_password("Password1").is_ok());
    }
}
