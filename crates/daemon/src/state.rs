//! Shared application state passed to all API handlers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};

use aw_context::ContextProvider;
use aw_domain::agent::AgentConfig;
use aw_domain::config::DaemonConfig;
use aw_domain::error::{Error, Result};
use aw_providers::registry::ProviderRegistry;
use aw_sessions::registry::Registry;
use aw_sessions::state::StateStore;

use crate::mcp::server::McpSession;
use crate::runtime::handle::LocalWorkerHandle;
use crate::runtime::lifecycle::SessionController;
use crate::runtime::workflow::WorkflowHandle;

/// One hosted agent: immutable config, the worker handle, and the
/// lifecycle controller that keeps it awake.
pub struct AgentEntry {
    pub config: AgentConfig,
    pub handle: Arc<LocalWorkerHandle>,
    pub controller: Arc<SessionController>,
    /// The registry record backing this agent's session file.
    pub session_id: String,
}

/// Shared daemon state. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DaemonConfig>,
    pub started_at: Instant,
    /// Flipped once the listener is bound; handlers 503 until then.
    pub ready: Arc<AtomicBool>,
    pub providers: Arc<ProviderRegistry>,
    pub store: Arc<dyn StateStore>,
    pub registry: Arc<Registry>,
    pub agents: Arc<RwLock<HashMap<String, Arc<AgentEntry>>>>,
    pub workflows: Arc<RwLock<HashMap<String, Arc<WorkflowHandle>>>>,
    /// Context providers by `workflow:tag`.
    pub contexts: Arc<Mutex<HashMap<String, Arc<ContextProvider>>>>,
    /// Live MCP transports by session id.
    pub mcp_sessions: Arc<RwLock<HashMap<String, Arc<McpSession>>>>,
    /// SHA-256 of the bearer token; `None` = no auth.
    pub api_token_hash: Option<Vec<u8>>,
    /// Signaled by `POST /shutdown` and the signal handler.
    pub shutdown: Arc<Notify>,
    /// Agents that hit their idle timeout; consumed by the idle reaper.
    pub idle_tx: mpsc::UnboundedSender<String>,
}

impl AppState {
    pub fn agent(&self, name: &str) -> Option<Arc<AgentEntry>> {
        self.agents.read().get(name).cloned()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The context provider for a workflow/tag pair, opened on first use.
    /// Context directories live under `<config-dir>/contexts/`.
    pub fn context_for(&self, workflow: &str, tag: &str) -> Result<Arc<ContextProvider>> {
        let workflow = sanitize_segment(workflow)?;
        let tag = sanitize_segment(tag)?;
        let key = format!("{workflow}:{tag}");

        let mut contexts = self.contexts.lock();
        if let Some(ctx) = contexts.get(&key) {
            return Ok(ctx.clone());
        }

        let dir: PathBuf = self
            .registry
            .root()
            .join("contexts")
            .join(&workflow)
            .join(&tag);
        let ctx = Arc::new(ContextProvider::open(dir)?);
        contexts.insert(key, ctx.clone());
        Ok(ctx)
    }

    /// Names of agents sharing a workflow/tag pair.
    pub fn workflow_agents(&self, workflow: &str, tag: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .values()
            .filter(|e| e.config.workflow == workflow && e.config.tag == tag)
            .map(|e| e.config.name.clone())
            .collect();
        names.sort();
        names
    }
}

fn sanitize_segment(value: &str) -> Result<String> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Other(format!(
            "invalid workflow/tag segment '{value}'"
        )));
    }
    Ok(value.to_string())
}
