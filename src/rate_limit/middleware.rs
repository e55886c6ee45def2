// Rate limiting middleware for public endpoints

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::Duration;

use super::{reset_at, RateLimiter};
use crate::auth::error::AuthError;
use crate::telemetry;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Client address used as the counter key
///
/// The socket peer wins; `X-Forwarded-For` is only consulted when the server
/// was not started with connect info.
pub fn client_key(request: &Request<Body>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn set_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_after: Duration) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at(reset_after)));
}

/// Reject requests over the limit with 429, otherwise annotate the response
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request);

    match limiter.check(&client).await {
        Ok(status) => {
            let mut response = next.run(request).await;
            set_headers(
                response.headers_mut(),
                status.limit,
                status.remaining,
                status.reset_after,
            );
            response
        }
        Err(AuthError::RateLimited { retry_after_secs }) => {
            telemetry::record_rate_limited();
            let mut response = AuthError::RateLimited { retry_after_secs }.into_response();
            set_headers(
                response.headers_mut(),
                limiter.limit(),
                0,
                Duration::from_secs(retry_after_secs),
            );
            response
        }
        Err(e) => e.into_response(),
    }
}
