// Validation utilities module
// Custom validators used by the request DTOs

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{3,50}$").expect("username pattern is valid"))
}

/// Validates that a username is 3-50 ASCII letters or digits
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username_pattern().is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_username"))
    }
}

/// Longest password bcrypt hashes without truncation, in bytes
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Rejects passwords bcrypt would silently truncate
pub fn validate_password_bytes(password: &str) -> Result<(), ValidationError> {
    if password.len() > MAX_PASSWORD_BYTES {
        let mut error = ValidationError::new("password_too_long");
        error.add_param("max_bytes".into(), &MAX_PASSWORD_BYTES);
        return Err(error);
    }
    Ok(())
}

/// Normalize an email for lookups and uniqueness checks
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("Bob42").is_ok());
        assert!(validate_username(&"a".repeat(50)).is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("alice_smith").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_password_byte_limit() {
        assert!(validate_password_bytes(&"a".repeat(72)).is_ok());
        assert!(validate_password_bytes(&"a".repeat(73)).is_err());
        // 25 three-byte characters is 75 bytes
        assert!(validate_password_bytes(&"€".repeat(25)).is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    proptest! {
        #[test]
        fn prop_alphanumeric_usernames_accepted(name in "[A-Za-z0-9]{3,50}") {
            prop_assert!(validate_username(&name).is_ok());
        }
    }
}
