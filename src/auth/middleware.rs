// Authentication middleware for protected routes

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, OriginalUri, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{error::AuthError, models::AccountResponse, service::AuthService};

/// Paths that never require a bearer token
pub const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/metrics",
    "/api/auth/signup",
    "/api/auth/signin",
    "/api/auth/refresh",
    "/api/auth/send-verification",
    "/api/auth/verify-email",
    "/api/auth/request-password-reset",
    "/api/auth/reset-password",
];

/// Whether a request path bypasses the session check
pub fn is_public_path(path: &str) -> bool {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    PUBLIC_PATHS.contains(&path)
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Unauthorized)?
        .to_str()
        .map_err(|_| AuthError::Unauthorized)?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::Unauthorized),
    }
}

/// Authenticated account attached to the request by [`require_session`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub account: AccountResponse,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

/// Session gate applied to every API route
///
/// Public paths pass through untouched. Anything else needs a bearer token
/// that resolves to an active account; token problems become 401 while store
/// failures keep their 500.
pub async fn require_session(
    State(service): State<Arc<AuthService>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    if is_public_path(&path) {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(request.headers()).map_err(|e| {
        warn!("Missing or malformed bearer token for endpoint: {}", path);
        e
    })?;

    let account = match service.validate_session(token).await {
        Ok(account) => account,
        Err(AuthError::Unauthorized) | Err(AuthError::InvalidToken) => {
            warn!("Session rejected for endpoint: {}", path);
            return Err(AuthError::Unauthorized);
        }
        Err(e) => return Err(e),
    };

    debug!("Session accepted: account_id={}, endpoint={}", account.id, path);
    request.extensions_mut().insert(AuthenticatedUser {
        account: account.into(),
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::tests::test_service;
    use axum::{
        body::to_bytes,
        http::{HeaderValue, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use proptest::prelude::*;
    use tower::ServiceExt;

    // Helper to build a router with one public and one protected route
    fn gated_app(service: Arc<AuthService>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/api/auth/me",
                get(|user: AuthenticatedUser| async move { user.account.username }),
            )
            .layer(from_fn_with_state(service, require_session))
    }

    fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn signed_in_token(service: &AuthService) -> String {
        service
            .sign_up("alice@example.com", "secret1234", "alice")
            .await
            .unwrap();
        service
            .sign_in("alice@example.com", "secret1234")
            .await
            .unwrap()
            .access_token
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/api/auth/signup/"));
        assert!(is_public_path("/api/auth/reset-password"));
        assert!(!is_public_path("/api/auth/me"));
        assert!(!is_public_path("/api/auth/signout"));
        assert!(!is_public_path("/"));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::Unauthorized)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::Unauthorized)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(matches!(bearer_token(&headers), Err(AuthError::Unauthorized)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }

    #[tokio::test]
    async fn test_public_path_passes_without_token() {
        let (service, _, _) = test_service();
        let response = gated_app(Arc::new(service))
            .oneshot(get_request("/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_authorization_header() {
        let (service, _, _) = test_service();
        let response = gated_app(Arc::new(service))
            .oneshot(get_request("/api/auth/me", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected() {
        let (service, _, _) = test_service();
        let response = gated_app(Arc::new(service))
            .oneshot(get_request("/api/auth/me", Some("Bearer not.a.jwt")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_attaches_account() {
        let (service, _, _) = test_service();
        let token = signed_in_token(&service).await;

        let response = gated_app(Arc::new(service))
            .oneshot(get_request("/api/auth/me", Some(&format!("Bearer {}", token))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn test_extractor_without_gate_is_unauthorized() {
        let mut parts = get_request("/api/auth/me", None).into_parts().0;
        let result = AuthenticatedUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    proptest! {
        #[test]
        fn prop_non_bearer_headers_rejected(value in "[A-Za-z0-9 ]{0,40}") {
            prop_assume!(!value.starts_with("Bearer "));
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
            prop_assert!(bearer_token(&headers).is_err());
        }

        #[test]
        fn prop_random_bearer_values_rejected(garbage in "[a-zA-Z0-9]{10,50}") {
            let (service, _, _) = test_service();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let response = rt.block_on(
                gated_app(Arc::new(service))
                    .oneshot(get_request("/api/auth/me", Some(&format!("Bearer {}", garbage))))
            ).unwrap();
            prop_assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
