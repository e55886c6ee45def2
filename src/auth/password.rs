// Password hashing and validation service

use crate::auth::error::AuthError;
use crate::validation::{validate_password_bytes, MAX_PASSWORD_BYTES};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Password service for hashing and verification
///
/// bcrypt is CPU-bound, so the async variants run on the blocking pool and
/// only suspend the calling task.
#[derive(Debug, Clone, Copy)]
pub struct PasswordService {
    cost: u32,
}

impl PasswordService {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt with a fresh salt
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::PasswordHashError(e.to_string()))
    }

    /// Verify a password against a hash
    ///
    /// Mismatches and unparsable hashes both yield `false`.
    pub fn verify_password(password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub async fn hash_password_blocking(&self, password: &str) -> Result<String, AuthError> {
        let service = *self;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || service.hash_password(&password))
            .await
            .map_err(|e| AuthError::PasswordHashError(e.to_string()))?
    }

    pub async fn verify_password_blocking(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || Self::verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::PasswordHashError(e.to_string()))
    }

    /// Validate password strength requirements
    ///
    /// At least `MIN_PASSWORD_LENGTH` characters and at most
    /// `MAX_PASSWORD_BYTES` bytes, since bcrypt ignores anything past that.
    pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
        let error = if password.chars().count() < MIN_PASSWORD_LENGTH {
            let mut error = validator::ValidationError::new("length");
            error.add_param("min".into(), &MIN_PASSWORD_LENGTH);
            error
        } else if let Err(error) = validate_password_bytes(password) {
            error
        } else {
            return Ok(());
        };

        let mut errors = validator::ValidationErrors::new();
        errors.add("password", error);
        Err(AuthError::ValidationError(errors))
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new(10)
    }
}
