// Authentication error types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use crate::error::ErrorResponse;

/// Authentication and session errors
///
/// `InvalidToken` deliberately covers malformed, expired, signature-mismatch,
/// used and revoked tokens so callers cannot tell which check failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Request validation failed")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Email already verified")]
    EmailAlreadyVerified,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Store call timed out after {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("Password hashing error: {0}")]
    PasswordHashError(String),

    #[error("Token generation error: {0}")]
    TokenGenerationError(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::StoreError(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        AuthError::StoreError(err.to_string())
    }
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::UserExists => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidToken => StatusCode::BAD_REQUEST,
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::EmailAlreadyVerified => StatusCode::BAD_REQUEST,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::StoreError(_)
            | AuthError::StoreTimeout(_)
            | AuthError::PasswordHashError(_)
            | AuthError::TokenGenerationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for infrastructure failures that must never be shown to clients
    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Client-safe message for this error
    pub fn error_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            AuthError::ValidationError(errors) => {
                debug!("Validation error: {:?}", errors);
                ErrorResponse::with_details(
                    self.error_message(),
                    serde_json::to_value(errors).unwrap_or_else(|_| serde_json::json!({})),
                )
            }
            AuthError::InvalidCredentials | AuthError::Unauthorized => {
                warn!("Authentication rejected: {}", self);
                ErrorResponse::new(self.error_message())
            }
            AuthError::InvalidToken => {
                warn!("Invalid token attempt");
                ErrorResponse::new(self.error_message())
            }
            AuthError::RateLimited { retry_after_secs } => ErrorResponse::with_details(
                self.error_message(),
                serde_json::json!({ "retry_after": retry_after_secs }),
            ),
            err if err.is_internal() => {
                error!("Internal auth error: {}", err);
                ErrorResponse::new(self.error_message())
            }
            _ => ErrorResponse::new(self.error_message()),
        };

        let mut response = body.into_response_with(status);
        if let AuthError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UserExists.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::InvalidToken.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::EmailAlreadyVerified.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::RateLimited { retry_after_secs: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::StoreTimeout(std::time::Duration::from_secs(3)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AuthError::StoreError("connection refused to 10.0.0.5:5432".to_string());
        assert_eq!(err.error_message(), "Internal server error");

        let err = AuthError::PasswordHashError("rng failure".to_string());
        assert_eq!(err.error_message(), "Internal server error");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = AuthError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
