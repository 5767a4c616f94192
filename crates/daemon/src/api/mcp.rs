//! The `/mcp` endpoint — session-scoped MCP transport routing.
//!
//! A POST without a session id must carry an `initialize` request; the
//! daemon mints a `<agent>-<random8>` session bound to the caller's
//! context and answers the initialize. Subsequent requests carry the
//! `mcp-session-id` header; DELETE tears the session down.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST};
use crate::mcp::server::{agent_from_session_id, new_session_id, MentionCallback, McpSession};
use crate::state::AppState;

use super::{api_error, require_ready};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Context used for MCP callers outside any workflow (including `user`).
const DEFAULT_WORKFLOW: &str = "default";
const DEFAULT_TAG: &str = "main";

#[derive(Debug, Deserialize)]
pub struct McpQuery {
    #[serde(default)]
    agent: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<McpQuery>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if method == Method::POST {
        handle_post(state, query, session_id, &body).await
    } else if method == Method::DELETE {
        handle_delete(state, session_id)
    } else {
        api_error(StatusCode::METHOD_NOT_ALLOWED, "use POST or DELETE")
    }
}

async fn handle_post(
    state: AppState,
    query: McpQuery,
    session_id: Option<String>,
    body: &str,
) -> Response {
    let req: JsonRpcRequest = match serde_json::from_str(body) {
        Ok(req) => req,
        Err(_) => return api_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    // Established session: route by the header.
    if let Some(session_id) = session_id {
        let Some(session) = state.mcp_sessions.read().get(&session_id).cloned() else {
            return api_error(
                StatusCode::NOT_FOUND,
                format!("unknown MCP session '{session_id}'"),
            );
        };
        return respond(session.handle(&req), None);
    }

    // No session: the body must be an initialize request.
    if req.method != "initialize" {
        let resp = JsonRpcResponse::failure(
            req.id.clone().unwrap_or(serde_json::Value::Null),
            INVALID_REQUEST,
            "expected initialize request to open an MCP session",
        );
        return (StatusCode::BAD_REQUEST, Json(resp)).into_response();
    }

    let caller = query.agent.unwrap_or_else(|| "user".into());
    let session = match open_session(&state, &caller) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let session_id = session.session_id.clone();
    state
        .mcp_sessions
        .write()
        .insert(session_id.clone(), session.clone());
    tracing::info!(session = %session_id, agent = %caller, "MCP session opened");

    respond(session.handle(&req), Some(session_id))
}

fn handle_delete(state: AppState, session_id: Option<String>) -> Response {
    let Some(session_id) = session_id else {
        return api_error(StatusCode::BAD_REQUEST, "missing mcp-session-id header");
    };
    match state.mcp_sessions.write().remove(&session_id) {
        Some(session) => {
            tracing::info!(session = %session_id, agent = %session.agent, "MCP session closed");
            Json(serde_json::json!({ "success": true })).into_response()
        }
        None => {
            tracing::debug!(
                session = %session_id,
                agent = ?agent_from_session_id(&session_id),
                "delete for unknown MCP session"
            );
            api_error(
                StatusCode::NOT_FOUND,
                format!("unknown MCP session '{session_id}'"),
            )
        }
    }
}

/// Build a session for a caller: resolve its workflow/tag, compute the
/// valid-agent set, and wire the mention wakeup callback.
fn open_session(state: &AppState, caller: &str) -> Result<Arc<McpSession>, Response> {
    let (workflow, tag) = match state.agent(caller) {
        Some(entry) if entry.config.in_workflow() => {
            (entry.config.workflow.clone(), entry.config.tag.clone())
        }
        _ => (DEFAULT_WORKFLOW.into(), DEFAULT_TAG.into()),
    };

    let mut valid_agents = state.workflow_agents(&workflow, &tag);
    for extra in [caller, "user"] {
        if !valid_agents.iter().any(|a| a == extra) {
            valid_agents.push(extra.to_string());
        }
    }
    valid_agents.sort();

    let context = state
        .context_for(&workflow, &tag)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let on_mention: MentionCallback = {
        let agents = state.agents.clone();
        Arc::new(move |name: &str| {
            if let Some(entry) = agents.read().get(name) {
                entry.controller.poke();
            }
        })
    };

    Ok(Arc::new(McpSession {
        session_id: new_session_id(caller),
        agent: caller.to_string(),
        context,
        valid_agents,
        with_proposals: true,
        on_mention,
    }))
}

fn respond(response: Option<JsonRpcResponse>, new_session: Option<String>) -> Response {
    let mut http = match response {
        Some(resp) => Json(resp).into_response(),
        // Notification: accepted, nothing to say.
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(session_id) = new_session {
        if let Ok(value) = session_id.parse() {
            http.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    http
}
