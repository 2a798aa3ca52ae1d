//! `bugflow serve` -- HTTP JSON API for report intake and lifecycle updates.
//!
//! Security features:
//! - CORS headers on all responses (permissive; the reporter widget is
//!   embedded in arbitrary origins)
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional operator API key via `[server] api_key` or BUGFLOW_API_KEY
//! - HMAC-SHA256 verification of GitHub webhook deliveries
//!
//! Endpoints:
//! - GET  /health                    - Server status (public)
//! - POST /api/bugs                  - Submit a report (public)
//! - GET  /api/bugs/{id}             - Report status (public)
//! - GET  /api/bugs                  - List reports (operator)
//! - POST /api/bugs/{id}/retry       - Retry a failed report (operator)
//! - POST /api/automation/callback   - Remediation workflow update (operator)
//! - POST /api/webhooks/github       - GitHub webhook (signed, or operator
//!                                     when no webhook secret is set)
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;
mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use bugflow_core::ReportService;

use self::handlers::{
    handle_automation_callback, handle_github_webhook, handle_health, handle_list,
    handle_not_found, handle_retry, handle_status, handle_submit,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::config::BugflowConfig;

/// Maximum request body size: 16 MB (inline screenshots ride in the body).
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Lower bound for the recovery sweep period.
const MIN_RECOVERY_PERIOD: Duration = Duration::from_millis(100);

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Build the router, middleware stack and shared state around a service.
fn router(service: Arc<ReportService>, config: &BugflowConfig) -> Router {
    let state = Arc::new(AppState {
        service,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        api_key: config.server.api_key.clone(),
        webhook_secret: config.webhooks.secret.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/bugs", post(handle_submit).get(handle_list))
        .route("/api/bugs/{id}", get(handle_status))
        .route("/api/bugs/{id}/retry", post(handle_retry))
        .route("/api/automation/callback", post(handle_automation_callback))
        .route("/api/webhooks/github", post(handle_github_webhook))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Sweep every half lease, so an abandoned dispatch claim is retaken at
/// most one and a half leases after it was taken.
fn recovery_period(claim_lease: Duration) -> Duration {
    (claim_lease / 2).max(MIN_RECOVERY_PERIOD)
}

/// Run [`ReportService::recover`] now and then on every period tick.
fn spawn_recovery(service: Arc<ReportService>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.recover().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "recovery sweep advanced reports"),
                Err(e) => tracing::error!(error = %e, "recovery sweep failed"),
            }
        }
    })
}

/// Start the HTTP server and run until Ctrl+C.
///
/// Once the listener is bound, a background sweep recovers reports left
/// unfinished by a previous run, a crashed task or an expired claim.
pub async fn start_server(
    config: BugflowConfig,
    port: u16,
    in_memory: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = crate::service::build_service(&config, in_memory)?;

    if config.server.api_key.is_some() {
        tracing::info!("operator API key authentication enabled");
    }
    if config.webhooks.secret.is_none() {
        if config.server.api_key.is_some() {
            tracing::warn!("no webhook secret configured; GitHub deliveries need the operator key");
        } else {
            tracing::warn!("no webhook secret configured; GitHub deliveries are not verified");
        }
    }
    tracing::info!(
        rate_limit = config.server.rate_limit,
        "rate limit: requests per minute per IP"
    );

    let app = router(service.clone(), &config);

    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("bugflow listening on http://{}", addr);

    let period = recovery_period(service.config().claim_lease);
    tracing::debug!(period_ms = period.as_millis() as u64, "recovery sweep scheduled");
    let recovery = spawn_recovery(service, period);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    recovery.abort();
    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_runs_twice_per_lease() {
        assert_eq!(
            recovery_period(Duration::from_secs(600)),
            Duration::from_secs(300)
        );
        assert_eq!(
            recovery_period(Duration::from_secs(1)),
            Duration::from_millis(500)
        );
        assert_eq!(recovery_period(Duration::ZERO), MIN_RECOVERY_PERIOD);
    }
}
