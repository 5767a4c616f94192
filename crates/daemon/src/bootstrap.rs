//! AppState construction and server startup/shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};

use aw_domain::config::{ConfigSeverity, DaemonConfig, StoreKind};
use aw_providers::mock::MockProvider;
use aw_providers::registry::ProviderRegistry;
use aw_sessions::registry::{DaemonRecord, Registry};
use aw_sessions::state::{FileStateStore, MemoryStateStore, StateStore};

use crate::api;
use crate::runtime::{spawn_idle_reaper, WorkerHandle};
use crate::state::AppState;

/// How long the graceful path waits for in-flight requests.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(10_000);

/// Validate config and wire every subsystem into a fully-built
/// [`AppState`]. Spawns the idle reaper; requires a Tokio runtime.
pub fn build_app_state(config: Arc<DaemonConfig>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed");
    }

    // ── Registry ─────────────────────────────────────────────────────
    let root = config
        .server
        .config_dir
        .clone()
        .unwrap_or_else(Registry::default_dir);
    let registry = Arc::new(Registry::open(&root).context("opening session registry")?);
    tracing::info!(root = %registry.root().display(), "session registry ready");

    // ── Providers ────────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::new());
    providers.register("mock", Arc::new(MockProvider::echo()));
    tracing::info!(backends = ?providers.backends(), "provider registry ready");

    // ── State store ──────────────────────────────────────────────────
    let store: Arc<dyn StateStore> = match config.store.kind {
        StoreKind::Memory => Arc::new(MemoryStateStore::new()),
        StoreKind::File => Arc::new(
            FileStateStore::new(registry.root().join("state"))
                .context("opening file state store")?,
        ),
    };
    tracing::info!(kind = ?config.store.kind, "state store ready");

    // ── Auth ─────────────────────────────────────────────────────────
    let api_token_hash = config
        .server
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(api::auth::token_hash);
    if api_token_hash.is_none() {
        tracing::warn!("no API token configured; the daemon runs unauthenticated");
    }

    // ── Idle reaper ──────────────────────────────────────────────────
    let (idle_tx, idle_rx) = mpsc::unbounded_channel();

    let state = AppState {
        config,
        started_at: Instant::now(),
        ready: Arc::new(AtomicBool::new(false)),
        providers,
        store,
        registry,
        agents: Arc::new(RwLock::new(HashMap::new())),
        workflows: Arc::new(RwLock::new(HashMap::new())),
        contexts: Arc::new(Mutex::new(HashMap::new())),
        mcp_sessions: Arc::new(RwLock::new(HashMap::new())),
        api_token_hash,
        shutdown: Arc::new(Notify::new()),
        idle_tx,
    };

    spawn_idle_reaper(state.clone(), idle_rx);
    Ok(state)
}

/// Bind, serve, and tear down. Errors before the bind (including another
/// daemon already running) surface to `main` as exit code 1.
pub async fn run_server(config: Arc<DaemonConfig>) -> anyhow::Result<()> {
    let state = build_app_state(config.clone())?;

    if state.registry.daemon_is_running() {
        anyhow::bail!("another daemon is already running");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    state
        .registry
        .write_daemon(&DaemonRecord {
            pid: std::process::id(),
            host: config.server.host.clone(),
            port: config.server.port,
            started_at: Utc::now(),
            token: config.server.token.clone(),
        })
        .context("writing daemon record")?;

    state.ready.store(true, Ordering::SeqCst);
    tracing::info!(addr = %addr, pid = std::process::id(), "daemon listening");

    let app = api::router(state.clone());
    let shutdown_state = state.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal(&shutdown_state).await })
        .await;

    teardown(&state).await;
    result.context("serving")?;
    Ok(())
}

async fn shutdown_signal(state: &AppState) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
        _ = state.shutdown.notified() => {}
    }
    tracing::info!("beginning graceful shutdown");
}

/// Drain in-flight requests (bounded), then stop controllers, persist
/// states, and clean the registry. File cleanup is best-effort.
async fn teardown(state: &AppState) {
    state.ready.store(false, Ordering::SeqCst);

    let deadline = Instant::now() + SHUTDOWN_DRAIN;
    loop {
        let busy: u32 = state
            .agents
            .read()
            .values()
            .map(|e| e.controller.pending_requests())
            .sum();
        if busy == 0 {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(busy, "shutdown drain deadline reached");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let entries: Vec<_> = state.agents.write().drain().map(|(_, e)| e).collect();
    for entry in entries {
        entry.controller.stop();
        if let Err(e) = state.store.save(&entry.config.name, &entry.handle.state()) {
            tracing::warn!(agent = %entry.config.name, error = %e, "final persist failed");
        }
        let _ = state.registry.unregister(&entry.session_id);
    }

    let _ = state.registry.remove_daemon();
    tracing::info!("shutdown complete");
}
