// HTTP handlers for authentication endpoints

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::{debug, warn};
use validator::Validate;

use crate::auth::{
    error::AuthError,
    middleware::AuthenticatedUser,
    models::{
        EmailRequest, HealthResponse, MeResponse, RefreshRequest, ResetPasswordRequest,
        SessionResponse, SignInRequest, SignUpRequest, SignUpResponse, VerifyEmailRequest,
    },
    service::{AuthService, Session},
};
use crate::error::{ErrorResponse, MessageResponse};

/// Body returned by the reset request endpoint whether or not the email exists
pub const RESET_REQUESTED_MESSAGE: &str =
    "If your email is registered, you will receive a password reset link";

/// Body returned by the send-verification endpoint in every case
pub const VERIFICATION_REQUESTED_MESSAGE: &str =
    "If your email is registered and unverified, you will receive a verification link";

fn session_response(session: Session, message: &str) -> SessionResponse {
    SessionResponse {
        user: session.account,
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        message: message.to_string(),
    }
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Account created", body = SignUpResponse),
        (status = 400, description = "Invalid input or user exists", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<SignUpRequest>,
) -> Result<Json<SignUpResponse>, AuthError> {
    payload.validate()?;

    let user = service
        .sign_up(&payload.email, &payload.password, &payload.username)
        .await?;

    Ok(Json(SignUpResponse {
        user,
        message: "User created successfully".to_string(),
    }))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/api/auth/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse, example = json!({"error": "Invalid email or password"})),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signin_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<SessionResponse>, AuthError> {
    payload.validate()?;

    let session = service.sign_in(&payload.email, &payload.password).await?;
    Ok(Json(session_response(session, "Signed in successfully")))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token issued", body = SessionResponse),
        (status = 401, description = "Refresh token unknown, expired or revoked", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<SessionResponse>, AuthError> {
    let session = service
        .refresh_session(&payload.refresh_token)
        .await
        .map_err(|e| match e {
            AuthError::InvalidToken => AuthError::Unauthorized,
            other => other,
        })?;

    Ok(Json(session_response(session, "Session refreshed")))
}

/// Sign out, revoking the supplied refresh token
#[utoipa::path(
    post,
    path = "/api/auth/signout",
    request_body(content = RefreshRequest, description = "Refresh token to revoke"),
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn signout_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
    payload: Option<Json<RefreshRequest>>,
) -> Json<MessageResponse> {
    match payload {
        Some(Json(body)) => {
            if let Err(e) = service.sign_out(user.account.id, &body.refresh_token).await {
                warn!("Refresh token revocation failed for {}: {}", user.account.id, e);
            }
        }
        None => debug!("Sign-out without refresh token for {}", user.account.id),
    }

    Json(MessageResponse::new("Signed out successfully"))
}

/// Current account
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Authenticated account", body = MeResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me_handler(user: AuthenticatedUser) -> Json<MeResponse> {
    Json(MeResponse { user: user.account })
}

/// Deactivate the current account
#[utoipa::path(
    delete,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Account deactivated", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn deactivate_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<MessageResponse>, AuthError> {
    service.deactivate(user.account.id).await?;
    Ok(Json(MessageResponse::new("Account deactivated")))
}

/// Request a new verification email
///
/// The lookup and send run on a background task, so the response is the same
/// and equally fast for every well-formed email.
#[utoipa::path(
    post,
    path = "/api/auth/send-verification",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn send_verification_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.validate()?;

    let email = payload.email;
    tokio::spawn(async move {
        if let Err(e) = service.send_verification_email(&email).await {
            debug!("Verification email not sent: {}", e);
        }
    });

    Ok(Json(MessageResponse::new(VERIFICATION_REQUESTED_MESSAGE)))
}

/// Verify an email address
#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Token invalid, expired or used, or email already verified", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.validate()?;

    service.verify_email(&payload.token).await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// Start a password reset
///
/// Issued on a background task; the response never waits on the store or
/// the mailer.
#[utoipa::path(
    post,
    path = "/api/auth/request-password-reset",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Always returned for a well-formed email", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn request_password_reset_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.validate()?;

    let email = payload.email;
    tokio::spawn(async move { service.request_password_reset(&email).await });
    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Token invalid, expired or used", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password_handler(
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.validate()?;

    service.reset_password(&payload.token, &payload.password).await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
