// Prometheus metrics for sign-in, token and rate-limit outcomes

use axum::{extract::State, http::header, response::IntoResponse};
use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const SIGN_IN_OUTCOMES: &[&str] = &["success", "invalid_credentials"];

const TOKEN_KINDS: &[&str] = &["access", "refresh", "verification", "reset"];

/// Install the process-wide recorder on first use and return its handle
pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            match metrics::set_global_recorder(recorder) {
                Ok(()) => info!("Prometheus metrics recorder installed"),
                Err(_) => warn!("A metrics recorder is already installed, /metrics may be empty"),
            }
            register_auth_metrics();
            handle
        })
        .clone()
}

/// Register every series at zero so scrapes see them before the first event
fn register_auth_metrics() {
    describe_counter!(
        "auth_sign_in_total",
        Unit::Count,
        "Sign-in attempts grouped by outcome"
    );
    describe_counter!(
        "auth_token_rejections_total",
        Unit::Count,
        "Rejected access, refresh, verification and reset tokens"
    );
    describe_counter!(
        "rate_limit_rejections_total",
        Unit::Count,
        "Requests answered with 429"
    );

    for outcome in SIGN_IN_OUTCOMES {
        counter!("auth_sign_in_total", "outcome" => *outcome).absolute(0);
    }
    for kind in TOKEN_KINDS {
        counter!("auth_token_rejections_total", "kind" => *kind).absolute(0);
    }
    counter!("rate_limit_rejections_total").absolute(0);
}

pub fn record_sign_in(success: bool) {
    let outcome = if success { "success" } else { "invalid_credentials" };
    counter!("auth_sign_in_total", "outcome" => outcome).increment(1);
}

/// `kind` is one of access, refresh, verification or reset
pub fn record_token_rejected(kind: &'static str) {
    counter!("auth_token_rejections_total", "kind" => kind).increment(1);
}

pub fn record_rate_limited() {
    counter!("rate_limit_rejections_total").increment(1);
}

/// Prometheus scrape endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus text exposition", body = String, content_type = "text/plain")
    ),
    tag = "health"
)]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_are_exported_after_init() {
        let handle = init_metrics();
        record_sign_in(false);
        record_token_rejected("refresh");
        record_rate_limited();

        let rendered = handle.render();
        assert!(rendered.contains("auth_sign_in_total"));
        assert!(rendered.contains("outcome=\"invalid_credentials\""));
        assert!(rendered.contains("kind=\"refresh\""));
        assert!(rendered.contains("rate_limit_rejections_total"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        record_token_rejected("access");
        assert!(first.render().contains("kind=\"access\""));
        assert!(second.render().contains("kind=\"access\""));
    }
}
