//! Agent lifecycle endpoints: CRUD plus per-agent ping, clear, and the
//! approval resolution surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use aw_domain::error::Error;
use aw_domain::schedule::ScheduleConfig;

use crate::runtime::{self, CreateAgentParams, WorkerHandle};
use crate::state::AppState;

use super::{api_error, domain_error, parse_json_body, require_ready};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let agents: Vec<Value> = state
        .agents
        .read()
        .values()
        .map(|entry| serde_json::to_value(&entry.config).unwrap_or_default())
        .collect();
    Json(serde_json::json!({ "agents": agents })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    name: Option<String>,
    model: Option<String>,
    system: Option<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    schedule: Option<ScheduleConfig>,
    #[serde(default)]
    idle_timeout: Option<u64>,
}

pub async fn create(State(state): State<AppState>, body: String) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let req: CreateAgentRequest = match parse_json_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    // Required fields yield a 400, not a deserialization failure.
    let (name, model, system) = match (req.name, req.model, req.system) {
        (Some(n), Some(m), Some(s)) if !n.is_empty() => (n, m, s),
        (None, ..) => return api_error(StatusCode::BAD_REQUEST, "missing required field: name"),
        (_, None, _) => return api_error(StatusCode::BAD_REQUEST, "missing required field: model"),
        (_, _, None) => return api_error(StatusCode::BAD_REQUEST, "missing required field: system"),
        _ => return api_error(StatusCode::BAD_REQUEST, "agent name must not be empty"),
    };

    let params = CreateAgentParams {
        name,
        model,
        system,
        backend: req.backend,
        workflow: req.workflow,
        tag: req.tag,
        schedule: req.schedule,
        idle_timeout: req.idle_timeout,
    };

    match runtime::create_agent(&state, params) {
        Ok(entry) => (
            StatusCode::CREATED,
            Json(serde_json::to_value(&entry.config).unwrap_or_default()),
        )
            .into_response(),
        Err(Error::NotFound(msg)) => api_error(StatusCode::BAD_REQUEST, msg),
        Err(err) => domain_error(err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET / DELETE /agents/:name
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn show(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };
    let session_state = entry.handle.state();
    Json(serde_json::json!({
        "config": entry.config,
        "messages": session_state.messages.len(),
        "usage": session_state.total_usage,
    }))
    .into_response()
}

pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    match runtime::remove_agent(&state, &name) {
        Ok(Some(_)) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found")),
        Err(err) => domain_error(err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents/:name/ping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent health snapshot (daemon readiness lives on `/health`).
pub async fn ping(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };
    Json(serde_json::json!({
        "agent": name,
        "health": entry.handle.health(),
        "usage": entry.handle.state().total_usage,
        "controller": entry.controller.snapshot(),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agents/:name/clear
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn clear(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };
    let cleared = entry.handle.clear();
    if let Err(e) = state.store.save(&name, &cleared) {
        tracing::warn!(agent = %name, error = %e, "persist after clear failed");
    }
    Json(serde_json::json!({ "success": true })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_approvals(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };
    Json(serde_json::json!({ "approvals": entry.handle.pending_approvals() })).into_response()
}

pub async fn approve(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };
    match entry.handle.approve(&id).await {
        Ok(result) => {
            if let Err(e) = state.store.save(&name, &entry.handle.state()) {
                tracing::warn!(agent = %name, error = %e, "persist after approval failed");
            }
            Json(serde_json::json!({ "success": true, "result": result })).into_response()
        }
        Err(err) => domain_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct DenyRequest {
    #[serde(default)]
    reason: Option<String>,
}

pub async fn deny(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    body: String,
) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let Some(entry) = state.agent(&name) else {
        return api_error(StatusCode::NOT_FOUND, format!("agent '{name}' not found"));
    };

    let req: DenyRequest = if body.trim().is_empty() {
        DenyRequest::default()
    } else {
        match parse_json_body(&body) {
            Ok(req) => req,
            Err(resp) => return resp,
        }
    };

    match entry.handle.deny(&id, req.reason) {
        Ok(()) => {
            if let Err(e) = state.store.save(&name, &entry.handle.state()) {
                tracing::warn!(agent = %name, error = %e, "persist after denial failed");
            }
            Json(serde_json::json!({ "success": true })).into_response()
        }
        Err(err) => domain_error(err),
    }
}
