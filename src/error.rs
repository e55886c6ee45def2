// Shared error response body
// Every error returned by the service serializes to the same JSON shape

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Consistent error response structure
///
/// `details` carries machine-readable context such as field-level validation
/// errors and is omitted from the JSON when there is nothing to report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message, safe to show to clients
    #[schema(example = "Invalid email or password")]
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            error: error.into(),
            details: Some(details),
        }
    }

    /// Pair this body with a status code and build the response
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Generic success body for endpoints that only acknowledge an action
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Signed out successfully")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_details_omitted_when_absent() {
        let body = serde_json::to_value(ErrorResponse::new("Invalid token")).unwrap();
        assert_eq!(body, json!({ "error": "Invalid token" }));
    }

    #[test]
    fn test_details_serialized_when_present() {
        let body = serde_json::to_value(ErrorResponse::with_details(
            "Request validation failed",
            json!({ "email": ["email"] }),
        ))
        .unwrap();
        assert_eq!(body["error"], "Request validation failed");
        assert_eq!(body["details"]["email"][0], "email");
    }
}
