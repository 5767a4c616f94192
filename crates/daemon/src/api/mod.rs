//! The daemon HTTP control plane.
//!
//! All endpoints speak JSON except `/run` (Server-Sent Events) and `/mcp`
//! (MCP transport). When a token is configured, every route requires
//! `Authorization: Bearer <token>` — auth short-circuits with 401 before
//! any other processing.

pub mod admin;
pub mod agents;
pub mod auth;
pub mod dispatch;
pub mod mcp;
pub mod workflows;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, delete, get, post};
use axum::Router;

use aw_providers::classify::classify;

use crate::state::AppState;

/// Build the daemon router with auth and request tracing applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/shutdown", post(admin::shutdown))
        // Agent lifecycle
        .route("/agents", get(agents::list).post(agents::create))
        .route("/agents/:name", get(agents::show).delete(agents::remove))
        .route("/agents/:name/ping", get(agents::ping))
        .route("/agents/:name/clear", post(agents::clear))
        .route("/agents/:name/approvals", get(agents::list_approvals))
        .route("/agents/:name/approvals/:id/approve", post(agents::approve))
        .route("/agents/:name/approvals/:id/deny", post(agents::deny))
        // Message dispatch
        .route("/run", post(dispatch::run))
        .route("/serve", post(dispatch::serve))
        // Workflows
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route("/workflows/:name", delete(workflows::remove_default_tag))
        .route("/workflows/:name/:tag", delete(workflows::remove))
        // MCP transport
        .route("/mcp", any(mcp::handle))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared response helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `{ "success": false, "error": … }` with the given status.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// Handlers must 503 before touching shared state pre-readiness.
pub fn require_ready(state: &AppState) -> Result<(), Response> {
    if state.is_ready() {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "daemon is starting",
        ))
    }
}

/// Parse a request body, mapping malformed JSON to the canonical 400.
pub fn parse_json_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, Response> {
    serde_json::from_str(body)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid JSON body"))
}

/// A turn failure: 500 with the error class and retryability attached.
pub fn turn_failure(err: &aw_domain::error::Error) -> Response {
    let classified = classify(err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "data": {
                "errorClass": classified.class,
                "retryable": classified.retryable,
            },
        })),
    )
        .into_response()
}

/// Map daemon errors onto client-facing statuses.
pub fn domain_error(err: aw_domain::error::Error) -> Response {
    use aw_domain::error::Error;
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::Auth(_) => StatusCode::FORBIDDEN,
        Error::BadSchedule(_) | Error::Config(_) | Error::Other(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}
