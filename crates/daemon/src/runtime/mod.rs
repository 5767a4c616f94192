//! Agent runtime: the worker turn loop, the handle seam, per-session
//! lifecycle, and workflow startup — plus the create/remove operations the
//! HTTP layer drives.

pub mod handle;
pub mod lifecycle;
pub mod worker;
pub mod workflow;

pub use handle::{LocalWorkerHandle, WorkerHandle};
pub use lifecycle::{ControllerConfig, SessionController};
pub use worker::{AgentWorker, SendOptions, StepInfo, WorkerEvent};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use aw_domain::agent::AgentConfig;
use aw_domain::error::{Error, Result};
use aw_domain::schedule::ScheduleConfig;
use aw_sessions::registry::SessionInfo;

use crate::state::{AgentEntry, AppState};

/// Everything needed to bring one agent up.
#[derive(Debug, Clone)]
pub struct CreateAgentParams {
    pub name: String,
    pub model: String,
    pub system: String,
    pub backend: Option<String>,
    pub workflow: Option<String>,
    pub tag: Option<String>,
    pub schedule: Option<ScheduleConfig>,
    pub idle_timeout: Option<u64>,
}

/// Create a worker + controller pair, register the session, and insert it
/// into the agent map. Fails with `Conflict` on duplicate names.
pub fn create_agent(state: &AppState, params: CreateAgentParams) -> Result<Arc<AgentEntry>> {
    if params.name.is_empty() {
        return Err(Error::Other("agent name must not be empty".into()));
    }

    let backend = params
        .backend
        .unwrap_or_else(|| state.config.agents.backend.clone());
    let provider = state.providers.resolve(&backend)?;

    let workflow = params.workflow.unwrap_or_default();
    let tag = if workflow.is_empty() {
        String::new()
    } else {
        params.tag.unwrap_or_else(|| "main".into())
    };

    // Resolve the schedule before taking the map lock so a bad schedule
    // never half-creates an agent.
    let resolved_schedule = params
        .schedule
        .as_ref()
        .map(|s| s.resolve())
        .transpose()?;

    let config = AgentConfig {
        name: params.name.clone(),
        model: params.model,
        system: params.system,
        backend,
        workflow: workflow.clone(),
        tag: tag.clone(),
        created_at: Utc::now(),
    };

    let context = config
        .in_workflow()
        .then(|| state.context_for(&workflow, &tag))
        .transpose()?;

    // Same-generation recreation restores the previous conversation.
    let initial_state = state.store.load(&config.name)?;

    let worker = Arc::new(AgentWorker::new(
        config.clone(),
        state.config.agents.clone(),
        provider,
        initial_state,
    ));
    let handle = Arc::new(LocalWorkerHandle::new(worker));

    let idle_timeout = Duration::from_millis(
        params
            .idle_timeout
            .unwrap_or(state.config.agents.idle_timeout_ms),
    );
    let controller_cfg = ControllerConfig {
        idle_timeout,
        schedule: resolved_schedule,
        ..Default::default()
    };

    let persist = {
        let store = state.store.clone();
        let handle = handle.clone();
        let name = config.name.clone();
        Arc::new(move || {
            if let Err(e) = store.save(&name, &handle.worker().state()) {
                tracing::warn!(agent = %name, error = %e, "state persist failed");
            }
        })
    };

    let controller = SessionController::new(
        &config.name,
        handle.clone() as Arc<dyn WorkerHandle>,
        context.clone(),
        controller_cfg,
        state.idle_tx.clone(),
        persist,
    );

    let entry = {
        let mut agents = state.agents.write();
        if agents.contains_key(&config.name) {
            return Err(Error::Conflict(format!(
                "agent '{}' already exists",
                config.name
            )));
        }
        let entry = Arc::new(AgentEntry {
            config: config.clone(),
            handle,
            controller: controller.clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
        });
        agents.insert(config.name.clone(), entry.clone());
        entry
    };

    controller.spawn();

    // Registry record; the daemon is ready to serve this agent now, so the
    // ready artifact is written immediately.
    let info = SessionInfo {
        id: entry.session_id.clone(),
        name: Some(config.name.clone()),
        workflow,
        tag,
        context_dir: context.as_ref().map(|c| c.dir().to_path_buf()),
        model: config.model.clone(),
        system: config.system.clone(),
        backend: config.backend.clone(),
        host: state.config.server.host.clone(),
        port: state.config.server.port,
        pid: std::process::id(),
        created_at: config.created_at,
        idle_timeout: params.idle_timeout,
        schedule: params.schedule,
    };
    if let Err(e) = state.registry.register(&info) {
        tracing::warn!(agent = %config.name, error = %e, "session registration failed");
    } else if let Err(e) = std::fs::write(state.registry.ready_path(&entry.session_id), "1") {
        tracing::warn!(agent = %config.name, error = %e, "ready file write failed");
    }

    tracing::info!(agent = %config.name, backend = %config.backend, "agent created");
    Ok(entry)
}

/// Persist state, stop the controller, and drop the agent. Returns the
/// removed entry, or `None` when no such agent exists.
pub fn remove_agent(state: &AppState, name: &str) -> Result<Option<Arc<AgentEntry>>> {
    let Some(entry) = state.agents.write().remove(name) else {
        return Ok(None);
    };

    // Persist before teardown so a recreation in this generation restores
    // the conversation.
    state.store.save(name, &entry.handle.worker().state())?;

    entry.controller.stop();
    if let Err(e) = state.registry.unregister(&entry.session_id) {
        tracing::warn!(agent = %name, error = %e, "session unregister failed");
    }

    tracing::info!(agent = %name, "agent removed");
    Ok(Some(entry))
}

/// The daemon's idle reaper: tears down agents whose idle timer fired.
pub fn spawn_idle_reaper(
    state: AppState,
    mut idle_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(name) = idle_rx.recv().await {
            match remove_agent(&state, &name) {
                Ok(Some(_)) => tracing::info!(agent = %name, "idle session reaped"),
                Ok(None) => {}
                Err(e) => tracing::warn!(agent = %name, error = %e, "idle reap failed"),
            }
        }
    })
}
