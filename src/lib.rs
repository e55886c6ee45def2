// Account authentication and session service
// Router assembly and shared application state

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod telemetry;
pub mod validation;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use auth::{
    handlers, middleware::require_session, AccountRepository, AuthService, EmailSender,
    PasswordService, TokenRepository, TokenService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use config::AppConfig;
use rate_limit::{rate_limit, RateLimiter};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signup_handler,
        handlers::signin_handler,
        handlers::refresh_handler,
        handlers::signout_handler,
        handlers::me_handler,
        handlers::deactivate_handler,
        handlers::send_verification_handler,
        handlers::verify_email_handler,
        handlers::request_password_reset_handler,
        handlers::reset_password_handler,
        handlers::health_handler,
        telemetry::metrics_handler,
    ),
    components(
        schemas(
            auth::models::SignUpRequest,
            auth::models::SignInRequest,
            auth::models::RefreshRequest,
            auth::models::VerifyEmailRequest,
            auth::models::EmailRequest,
            auth::models::ResetPasswordRequest,
            auth::models::AccountResponse,
            auth::models::SignUpResponse,
            auth::models::SessionResponse,
            auth::models::MeResponse,
            auth::models::HealthResponse,
            error::ErrorResponse,
            error::MessageResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Sign-up, sessions, email verification and password reset"),
        (name = "health", description = "Service liveness and metrics")
    ),
    info(
        title = "Fowergram Auth API",
        version = "1.0.0",
        description = "Account authentication and session lifecycle"
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Application state shared across handlers and middleware
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub rate_limiter: RateLimiter,
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Installs the Prometheus recorder if no state has done so yet
    pub fn new(auth: Arc<AuthService>, rate_limiter: RateLimiter) -> Self {
        Self {
            auth,
            rate_limiter,
            metrics: telemetry::init_metrics(),
        }
    }
}

/// Wire an [`AuthService`] from configuration, the chosen stores and a mailer
pub fn build_auth_service(
    config: &AppConfig,
    accounts: Arc<dyn AccountRepository>,
    tokens: Arc<dyn TokenRepository>,
    email_sender: Arc<dyn EmailSender>,
) -> AuthService {
    AuthService::new(
        accounts,
        tokens,
        PasswordService::new(config.bcrypt_cost),
        TokenService::new(&config.jwt_secret),
        email_sender,
    )
    .with_token_ttls(config.access_token_ttl, config.refresh_token_ttl)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

/// Build the application router
///
/// Public auth routes are rate limited. Every route except Swagger goes
/// through the session gate, which lets the public allow-list pass.
pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let public = Router::new()
        .route("/signup", post(handlers::signup_handler))
        .route("/signin", post(handlers::signin_handler))
        .route("/refresh", post(handlers::refresh_handler))
        .route("/send-verification", post(handlers::send_verification_handler))
        .route("/verify-email", post(handlers::verify_email_handler))
        .route(
            "/request-password-reset",
            post(handlers::request_password_reset_handler),
        )
        .route("/reset-password", post(handlers::reset_password_handler))
        .route_layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit));

    let protected = Router::new()
        .route("/signout", post(handlers::signout_handler))
        .route(
            "/me",
            get(handlers::me_handler).delete(handlers::deactivate_handler),
        );

    let api = Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/metrics",
            get(telemetry::metrics_handler).with_state(state.metrics.clone()),
        )
        .nest("/api/auth", public.merge(protected).with_state(state.auth.clone()))
        .layer(from_fn_with_state(state.auth.clone(), require_session));

    api.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(allowed_origins))
}

#[cfg(test)]
mod tests;
