//! Workflow endpoints: start, list, stop.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::runtime::workflow::{self, WorkflowSpec};
use crate::runtime::WorkerHandle;
use crate::state::AppState;

use super::{domain_error, parse_json_body, require_ready};

/// `POST /workflows` — parse the workflow and start every agent.
pub async fn create(State(state): State<AppState>, body: String) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let spec: WorkflowSpec = match parse_json_body(&body) {
        Ok(spec) => spec,
        Err(resp) => return resp,
    };

    match workflow::start_workflow(&state, spec) {
        Ok(handle) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "workflow": handle.name,
                "tag": handle.tag,
                "agents": handle.agents,
                "context_dir": handle.context.dir(),
            })),
        )
            .into_response(),
        Err(err) => domain_error(err),
    }
}

/// `GET /workflows` — every running workflow with per-agent controller
/// state.
pub async fn list(State(state): State<AppState>) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let workflows: Vec<Value> = state
        .workflows
        .read()
        .values()
        .map(|handle| {
            let controllers: Vec<Value> = handle
                .agents
                .iter()
                .filter_map(|name| state.agent(name))
                .map(|entry| {
                    serde_json::json!({
                        "controller": entry.controller.snapshot(),
                        "health": entry.handle.health(),
                    })
                })
                .collect();
            serde_json::json!({
                "workflow": handle.name,
                "tag": handle.tag,
                "started_at": handle.started_at,
                "agents": controllers,
            })
        })
        .collect();
    Json(serde_json::json!({ "workflows": workflows })).into_response()
}

/// `DELETE /workflows/:name/:tag` — stop all controllers, drop the handle.
pub async fn remove(
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    stop(&state, &name, &tag)
}

/// `DELETE /workflows/:name` — convenience route, tag defaults to `main`.
pub async fn remove_default_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    stop(&state, &name, "main")
}

fn stop(state: &AppState, name: &str, tag: &str) -> Response {
    match workflow::stop_workflow(state, name, tag) {
        Ok(Some(_)) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(None) => super::api_error(
            StatusCode::NOT_FOUND,
            format!("workflow '{name}:{tag}' not found"),
        ),
        Err(err) => domain_error(err),
    }
}
