//! End-to-end tests driving the daemon router in-process.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

use aw_daemon::api;
use aw_daemon::bootstrap::build_app_state;
use aw_daemon::state::AppState;
use aw_domain::config::DaemonConfig;

fn test_state(token: Option<&str>) -> (TempDir, AppState, Router) {
    let dir = TempDir::new().unwrap();
    let mut config = DaemonConfig::default();
    config.server.config_dir = Some(dir.path().to_path_buf());
    config.server.token = token.map(String::from);

    let state = build_app_state(Arc::new(config)).unwrap();
    state.ready.store(true, Ordering::SeqCst);
    let router = api::router(state.clone());
    (dir, state, router)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call_raw(router, method, uri, body).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn call_raw(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn create_agent_body(name: &str) -> Value {
    serde_json::json!({ "name": name, "model": "m", "system": "p" })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Basic daemon endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, _state, router) = test_state(None);
    let (status, json) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["agents"], 0);
}

#[tokio::test]
async fn unready_daemon_returns_503() {
    let (_dir, state, router) = test_state(None);
    state.ready.store(false, Ordering::SeqCst);
    let (status, _) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = call(&router, Method::GET, "/agents", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn create_send_delete_roundtrip() {
    let (_dir, _state, router) = test_state(None);

    let (status, json) =
        call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["name"], "alice");

    let (status, json) = call(
        &router,
        Method::POST,
        "/serve",
        Some(serde_json::json!({ "agent": "alice", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!json["content"].as_str().unwrap().is_empty());
    assert!(json["usage"]["total"].as_u64().unwrap() > 0);

    let (status, json) = call(&router, Method::DELETE, "/agents/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, _) = call(&router, Method::GET, "/agents/alice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_agent_name_conflicts() {
    let (_dir, _state, router) = test_state(None);
    let (status, _) =
        call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) =
        call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_fields_and_bad_json_yield_400() {
    let (_dir, _state, router) = test_state(None);

    let (status, json) = call(
        &router,
        Method::POST,
        "/agents",
        Some(serde_json::json!({ "name": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("model"));

    // Raw, non-JSON body.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/agents")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Invalid JSON body");
}

#[tokio::test]
async fn serve_unknown_agent_is_404() {
    let (_dir, _state, router) = test_state(None);
    let (status, _) = call(
        &router,
        Method::POST,
        "/serve",
        Some(serde_json::json!({ "agent": "ghost", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn state_persists_across_recreation() {
    let (_dir, _state, router) = test_state(None);
    call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    call(
        &router,
        Method::POST,
        "/serve",
        Some(serde_json::json!({ "agent": "alice", "message": "remember me" })),
    )
    .await;
    call(&router, Method::DELETE, "/agents/alice", None).await;

    // Same daemon generation: recreation restores the transcript.
    call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    let (status, json) = call(&router, Method::GET, "/agents/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["messages"], 2);
}

#[tokio::test]
async fn ping_carries_health_snapshot() {
    let (_dir, _state, router) = test_state(None);
    call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;
    let (status, json) = call(&router, Method::GET, "/agents/alice/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["health"]["status"], "healthy");
    assert_eq!(json["health"]["consecutive_failures"], 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn run_streams_chunks_then_done() {
    let (_dir, _state, router) = test_state(None);
    call(&router, Method::POST, "/agents", Some(create_agent_body("alice"))).await;

    let (status, bytes) = call_raw(
        &router,
        Method::POST,
        "/run",
        Some(serde_json::json!({ "agent": "alice", "message": "stream this" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body = String::from_utf8(bytes).unwrap();
    assert!(body.contains("event: chunk"), "no chunk events in: {body}");
    assert!(body.contains("event: done"), "no done event in: {body}");
    assert!(body.contains("ack: stream this"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn token_gates_every_endpoint() {
    let (_dir, _state, router) = test_state(Some("sesame-open-sesame"));

    // No header → 401 before any processing.
    let (status, json) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Unauthorized");

    // Wrong token → 401.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct token → through.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .header(header::AUTHORIZATION, "Bearer sesame-open-sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn workflow_body() -> Value {
    serde_json::json!({
        "name": "research",
        "agents": [
            { "name": "planner", "model": "m", "system": "plan" },
            { "name": "writer", "model": "m", "system": "write" },
        ],
    })
}

#[tokio::test]
async fn workflow_start_list_stop() {
    let (_dir, _state, router) = test_state(None);

    let (status, json) = call(&router, Method::POST, "/workflows", Some(workflow_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["tag"], "main");
    assert_eq!(json["agents"].as_array().unwrap().len(), 2);

    let (status, json) = call(&router, Method::GET, "/workflows", None).await;
    assert_eq!(status, StatusCode::OK);
    let workflows = json["workflows"].as_array().unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0]["agents"].as_array().unwrap().len(), 2);

    // Workflow agents are listed alongside standalone agents.
    let (_, json) = call(&router, Method::GET, "/agents", None).await;
    assert_eq!(json["agents"].as_array().unwrap().len(), 2);

    // Convenience route: tag defaults to main.
    let (status, json) = call(&router, Method::DELETE, "/workflows/research", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, json) = call(&router, Method::GET, "/agents", None).await;
    assert!(json["agents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_workflow_conflicts() {
    let (_dir, _state, router) = test_state(None);
    let (status, _) = call(&router, Method::POST, "/workflows", Some(workflow_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&router, Method::POST, "/workflows", Some(workflow_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn mcp_session_lifecycle() {
    let (_dir, _state, router) = test_state(None);

    // Opening without an initialize request is rejected.
    let (status, _) = call(
        &router,
        Method::POST,
        "/mcp?agent=alice",
        Some(serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Initialize mints a session id carrying the agent identity.
    let init = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "test", "version": "0" } },
    });
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mcp?agent=alice")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(init.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(session_id.starts_with("alice-"));

    // tools/list through the established session.
    let list = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mcp")
                .header("mcp-session-id", &session_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(list.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    let tools = json["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "channel_send"));

    // DELETE terminates the session; further use 404s.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/mcp")
                .header("mcp-session-id", &session_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mcp")
                .header("mcp-session-id", &session_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(list.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mcp_channel_send_reaches_agent_inbox() {
    let (_dir, state, router) = test_state(None);
    call(&router, Method::POST, "/workflows", Some(workflow_body())).await;

    // planner opens an MCP session and messages writer.
    let init = serde_json::json!({ "jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {} });
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mcp?agent=planner")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(init.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let send = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": "channel_send", "arguments": { "message": "draft ready", "to": "writer" } },
    });
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/mcp")
                .header("mcp-session-id", &session_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(send.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The message lands in writer's inbox — unless the 2 s inbox poller
    // already drained it, in which case writer's reply is on the channel.
    let context = state.context_for("research", "main").unwrap();
    let inbox = context.inbox("writer").unwrap();
    if inbox.is_empty() {
        let all = context
            .read_channel(&aw_context::ReadFilter::default())
            .unwrap();
        assert!(all.iter().any(|e| e.from == "writer"));
    } else {
        assert_eq!(inbox[0].content, "draft ready");
    }
}
