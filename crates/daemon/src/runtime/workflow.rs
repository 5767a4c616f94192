//! Workflow startup — brings a group of agents up on one shared context.
//!
//! The runner boundary returns `{controllers, context_provider, shutdown}`;
//! the HTTP layer exposes exactly that shape through `/workflows`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use aw_context::ContextProvider;
use aw_domain::error::{Error, Result};
use aw_domain::schedule::ScheduleConfig;

use crate::state::AppState;

use super::{create_agent, remove_agent, CreateAgentParams};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    pub agents: Vec<WorkflowAgentSpec>,
}

fn default_tag() -> String {
    "main".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowAgentSpec {
    pub name: String,
    pub model: String,
    pub system: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub idle_timeout: Option<u64>,
}

/// A started workflow: its agents share one context provider.
pub struct WorkflowHandle {
    pub name: String,
    pub tag: String,
    pub agents: Vec<String>,
    pub context: Arc<ContextProvider>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowHandle {
    pub fn key(&self) -> String {
        workflow_key(&self.name, &self.tag)
    }
}

pub fn workflow_key(name: &str, tag: &str) -> String {
    format!("{name}:{tag}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start every agent of a workflow. All-or-nothing: a failure partway
/// tears down the agents already started.
pub fn start_workflow(state: &AppState, spec: WorkflowSpec) -> Result<Arc<WorkflowHandle>> {
    if spec.agents.is_empty() {
        return Err(Error::Other("workflow has no agents".into()));
    }

    let key = workflow_key(&spec.name, &spec.tag);
    if state.workflows.read().contains_key(&key) {
        return Err(Error::Conflict(format!(
            "workflow '{key}' is already running"
        )));
    }

    let context = state.context_for(&spec.name, &spec.tag)?;

    let mut started: Vec<String> = Vec::new();
    for agent in &spec.agents {
        let params = CreateAgentParams {
            name: agent.name.clone(),
            model: agent.model.clone(),
            system: agent.system.clone(),
            backend: agent.backend.clone(),
            workflow: Some(spec.name.clone()),
            tag: Some(spec.tag.clone()),
            schedule: agent.schedule.clone(),
            idle_timeout: agent.idle_timeout,
        };
        match create_agent(state, params) {
            Ok(_) => started.push(agent.name.clone()),
            Err(e) => {
                for name in &started {
                    let _ = remove_agent(state, name);
                }
                return Err(e);
            }
        }
    }

    let handle = Arc::new(WorkflowHandle {
        name: spec.name.clone(),
        tag: spec.tag.clone(),
        agents: started,
        context,
        started_at: Utc::now(),
    });
    state.workflows.write().insert(key, handle.clone());

    tracing::info!(
        workflow = %spec.name,
        tag = %spec.tag,
        agents = handle.agents.len(),
        "workflow started"
    );
    Ok(handle)
}

/// Stop all of a workflow's controllers and drop the handle.
pub fn stop_workflow(state: &AppState, name: &str, tag: &str) -> Result<Option<Arc<WorkflowHandle>>> {
    let key = workflow_key(name, tag);
    let Some(handle) = state.workflows.write().remove(&key) else {
        return Ok(None);
    };

    for agent in &handle.agents {
        if let Err(e) = remove_agent(state, agent) {
            tracing::warn!(agent = %agent, error = %e, "workflow agent teardown failed");
        }
    }

    tracing::info!(workflow = %name, tag = %tag, "workflow stopped");
    Ok(Some(handle))
}
