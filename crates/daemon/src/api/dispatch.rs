//! Message dispatch: `/serve` (synchronous) and `/run` (SSE streaming).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::runtime::lifecycle::SessionController;
use crate::runtime::{SendOptions, WorkerEvent, WorkerHandle};
use crate::state::{AgentEntry, AppState};

use super::{api_error, parse_json_body, require_ready, turn_failure};

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    agent: Option<String>,
    message: Option<String>,
    #[serde(default)]
    auto_approve: Option<bool>,
}

/// Decrements `pending_requests` however the request ends, including a
/// client disconnect mid-stream.
struct RequestGuard {
    controller: Arc<SessionController>,
}

impl RequestGuard {
    fn begin(controller: Arc<SessionController>) -> Self {
        controller.begin_request();
        Self { controller }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.controller.end_request();
    }
}

fn resolve_request(
    state: &AppState,
    body: &str,
) -> Result<(Arc<AgentEntry>, String, SendOptions), Response> {
    let req: DispatchRequest = parse_json_body(body)?;
    let Some(agent) = req.agent else {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing required field: agent"));
    };
    let Some(message) = req.message else {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing required field: message"));
    };
    let Some(entry) = state.agent(&agent) else {
        return Err(api_error(StatusCode::NOT_FOUND, format!("agent '{agent}' not found")));
    };
    let opts = SendOptions {
        no_auto_approve: !req.auto_approve.unwrap_or(true),
        ..Default::default()
    };
    Ok((entry, message, opts))
}

fn persist(state: &AppState, entry: &AgentEntry) {
    if let Err(e) = state.store.save(&entry.config.name, &entry.handle.state()) {
        tracing::warn!(agent = %entry.config.name, error = %e, "state persist failed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /serve — synchronous turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn serve(State(state): State<AppState>, body: String) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let (entry, message, opts) = match resolve_request(&state, &body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    let _guard = RequestGuard::begin(entry.controller.clone());
    match entry.handle.send(&message, opts).await {
        Ok(response) => {
            persist(&state, &entry);
            Json(serde_json::to_value(&response).unwrap_or_default()).into_response()
        }
        Err(err) => turn_failure(&err),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /run — SSE streaming turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streams `event: chunk` per text chunk, then `event: done` with the full
/// response (state is persisted right before it), or `event: error`.
pub async fn run(State(state): State<AppState>, body: String) -> Response {
    if let Err(resp) = require_ready(&state) {
        return resp;
    }
    let (entry, message, opts) = match resolve_request(&state, &body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    let guard = RequestGuard::begin(entry.controller.clone());
    let mut rx = entry.handle.send_stream(message, opts);

    let stream = async_stream::stream! {
        // Owned by the stream: released when the stream ends or the
        // client goes away.
        let _guard = guard;

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Chunk(text) => {
                    let data = serde_json::json!({ "text": text }).to_string();
                    yield Ok::<_, std::convert::Infallible>(
                        Event::default().event("chunk").data(data),
                    );
                }
                WorkerEvent::Done(response) => {
                    persist(&state, &entry);
                    let data = serde_json::to_string(&*response).unwrap_or_default();
                    yield Ok(Event::default().event("done").data(data));
                }
                WorkerEvent::Error { message, class, retryable } => {
                    let data = serde_json::json!({
                        "success": false,
                        "error": message,
                        "data": { "errorClass": class, "retryable": retryable },
                    })
                    .to_string();
                    yield Ok(Event::default().event("error").data(data));
                }
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
