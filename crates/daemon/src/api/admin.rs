//! Daemon-level endpoints: health probe and shutdown.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /health` — daemon readiness, not per-agent health (that is on
/// `/agents/:name/ping`).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if !state.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "starting" })),
        )
            .into_response();
    }

    Json(serde_json::json!({
        "status": "ok",
        "pid": std::process::id(),
        "port": state.config.server.port,
        "uptime": state.uptime_secs(),
        "agents": state.agents.read().len(),
        "workflows": state.workflows.read().len(),
    }))
    .into_response()
}

/// `POST /shutdown` — schedule a graceful shutdown and return immediately.
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!("shutdown requested over HTTP");
    let notify = state.shutdown.clone();
    tokio::spawn(async move {
        // Let the response flush first.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        notify.notify_waiters();
    });
    Json(serde_json::json!({ "success": true }))
}
