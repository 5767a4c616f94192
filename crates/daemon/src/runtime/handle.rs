//! The worker handle — the seam between the HTTP layer / lifecycle and a
//! concrete worker. The daemon only ever talks to agents through this
//! trait, so alternative worker placements slot in without touching the
//! control plane.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use aw_domain::error::Result;
use aw_domain::message::{AgentResponse, PendingApproval, SessionState};
use aw_providers::health::HealthState;

use super::worker::{AgentWorker, SendOptions, WorkerEvent};

#[async_trait::async_trait]
pub trait WorkerHandle: Send + Sync {
    async fn send(&self, input: &str, opts: SendOptions) -> Result<AgentResponse>;

    /// Start a streaming turn; the receiver ends with `Done` or `Error`.
    fn send_stream(&self, input: String, opts: SendOptions) -> mpsc::Receiver<WorkerEvent>;

    fn state(&self) -> SessionState;

    fn health(&self) -> HealthState;

    async fn approve(&self, approval_id: &str) -> Result<Value>;

    fn deny(&self, approval_id: &str, reason: Option<String>) -> Result<()>;

    fn pending_approvals(&self) -> Vec<PendingApproval>;

    fn clear(&self) -> SessionState;
}

/// In-process handle wrapping an [`AgentWorker`].
pub struct LocalWorkerHandle {
    worker: Arc<AgentWorker>,
}

impl LocalWorkerHandle {
    pub fn new(worker: Arc<AgentWorker>) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> &Arc<AgentWorker> {
        &self.worker
    }
}

#[async_trait::async_trait]
impl WorkerHandle for LocalWorkerHandle {
    async fn send(&self, input: &str, opts: SendOptions) -> Result<AgentResponse> {
        self.worker.send(input, &opts).await
    }

    fn send_stream(&self, input: String, opts: SendOptions) -> mpsc::Receiver<WorkerEvent> {
        self.worker.clone().send_stream(input, opts)
    }

    fn state(&self) -> SessionState {
        self.worker.state()
    }

    fn health(&self) -> HealthState {
        self.worker.health()
    }

    async fn approve(&self, approval_id: &str) -> Result<Value> {
        self.worker.approve(approval_id).await
    }

    fn deny(&self, approval_id: &str, reason: Option<String>) -> Result<()> {
        self.worker.deny(approval_id, reason)
    }

    fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.worker.pending_approvals()
    }

    fn clear(&self) -> SessionState {
        self.worker.clear()
    }
}
