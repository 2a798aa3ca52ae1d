//! HTTP route handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use bugflow_core::{AutomationUpdate, LifecycleError, Submission};
use bugflow_storage::{ReportFilter, ReportId, ReportStatus, StorageError};

use super::json_error;
use super::state::AppState;
use super::webhooks::{update_from_event, verify_signature};

/// Default page size for the operator list.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Map a lifecycle error to its HTTP response.
fn error_response(err: &LifecycleError) -> Response {
    let status = match err {
        LifecycleError::InvalidSubmission(_) | LifecycleError::InvalidUpdate(_) => {
            StatusCode::BAD_REQUEST
        }
        LifecycleError::NotRetryable { .. } => StatusCode::CONFLICT,
        LifecycleError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
        LifecycleError::Storage(_) => {
            tracing::error!(error = %err, "storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, &err.to_string()).into_response()
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// POST /api/bugs
///
/// Persists the report and returns the receipt. Triage and issue creation
/// continue in the background.
pub(crate) async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Json(parsed): Json<serde_json::Value>,
) -> Response {
    let submission: Submission = match serde_json::from_value(parsed) {
        Ok(s) => s,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid submission: {}", e),
            )
            .into_response()
        }
    };

    match state.service.submit_and_dispatch(submission).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/bugs/{id}
pub(crate) async fn handle_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.service.status(&ReportId::from(id)).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    status: Option<String>,
    limit: Option<usize>,
}

/// GET /api/bugs?status=&limit=
pub(crate) async fn handle_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<ReportStatus>() {
            Ok(status) => Some(status),
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response(),
        },
        None => None,
    };
    let filter = ReportFilter {
        status,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };

    match state.service.list(&filter).await {
        Ok(reports) => {
            let response = serde_json::json!({
                "count": reports.len(),
                "reports": reports,
            });
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/bugs/{id}/retry
pub(crate) async fn handle_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = ReportId::from(id);
    match state.service.retry_failed(&id).await {
        Ok(status) => {
            let response = serde_json::json!({ "id": id, "status": status });
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/automation/callback
///
/// Body: `{report_id, new_status, url?, reason?}`. Updates that are not
/// forward moves are acknowledged with `"outcome": "ignored"`.
pub(crate) async fn handle_automation_callback(
    State(state): State<Arc<AppState>>,
    Json(parsed): Json<serde_json::Value>,
) -> Response {
    let update: AutomationUpdate = match serde_json::from_value(parsed) {
        Ok(u) => u,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid update: {}", e))
                .into_response()
        }
    };

    match state.service.apply_automation_update(update).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/webhooks/github
///
/// The body is read raw so the signature is checked over the exact bytes
/// GitHub signed.
pub(crate) async fn handle_github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            tracing::warn!("webhook signature mismatch");
            return json_error(StatusCode::UNAUTHORIZED, "invalid webhook signature")
                .into_response();
        }
    }

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if event == "ping" {
        return (StatusCode::OK, Json(serde_json::json!({ "outcome": "pong" }))).into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid payload: {}", e))
                .into_response()
        }
    };

    let Some(update) = update_from_event(&event, &payload) else {
        tracing::debug!(%event, "webhook event ignored");
        let response = serde_json::json!({ "outcome": "ignored", "event": event });
        return (StatusCode::OK, Json(response)).into_response();
    };

    tracing::info!(
        %event,
        report_id = %update.report_id,
        status = %update.new_status,
        "webhook stage update"
    );
    match state.service.apply_automation_update(update).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}
