//! Immutable agent identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The immutable identity of an agent, fixed at creation and removed with
/// the agent. Everything mutable lives in `SessionState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique within the daemon.
    pub name: String,
    /// Provider model identifier (opaque to the daemon).
    pub model: String,
    /// System prompt text.
    pub system: String,
    /// Provider backend kind this agent talks to.
    pub backend: String,
    /// Workflow namespace; empty for standalone agents.
    #[serde(default)]
    pub workflow: String,
    /// Tag within the workflow namespace.
    #[serde(default)]
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

impl AgentConfig {
    /// Whether this agent belongs to a workflow.
    pub fn in_workflow(&self) -> bool {
        !self.workflow.is_empty()
    }

    /// The `workflow:tag` context key, when in a workflow.
    pub fn context_key(&self) -> Option<String> {
        self.in_workflow()
            .then(|| format!("{}:{}", self.workflow, self.tag))
    }
}
