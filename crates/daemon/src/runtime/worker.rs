//! The agent worker — one agent's turn loop.
//!
//! A turn takes one user message, drives the provider's tool loop (assistant
//! step → tool calls → tool results → …) until the model stops or the step
//! cap is hit, and finishes with exactly one complete assistant entry in the
//! transcript. Provider calls run behind the retry engine and every outcome
//! feeds the health tracker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use aw_domain::agent::AgentConfig;
use aw_domain::config::AgentDefaults;
use aw_domain::error::{Error, Result};
use aw_domain::message::{
    AgentMessage, AgentResponse, ApprovalStatus, MessageStatus, PendingApproval, Role,
    SessionState, TokenUsage, ToolInvocation,
};
use aw_domain::stream::StreamEvent;
use aw_domain::tool::{ProviderMessage, Tool, ToolCall, ToolDefinition};
use aw_providers::classify::classify;
use aw_providers::health::{HealthState, HealthTracker};
use aw_providers::retry::{with_retry, RetryPolicy};
use aw_providers::traits::{ChatRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options & events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-step report passed to the `on_step_finish` callback.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub step_number: u32,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Option<TokenUsage>,
}

pub type StepCallback = Arc<dyn Fn(StepInfo) + Send + Sync>;

/// Options for one `send`/`send_stream`.
#[derive(Clone, Default)]
pub struct SendOptions {
    /// When `false`, tools with an approval predicate are gated.
    pub no_auto_approve: bool,
    pub on_step_finish: Option<StepCallback>,
}

impl SendOptions {
    pub fn auto_approve(&self) -> bool {
        !self.no_auto_approve
    }
}

/// Events yielded by a streaming turn; `Done`/`Error` terminate the stream.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Chunk(String),
    Done(Box<AgentResponse>),
    Error {
        message: String,
        class: aw_providers::classify::ErrorClass,
        retryable: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DefsCache {
    generation: u64,
    defs: Arc<Vec<ToolDefinition>>,
}

pub struct AgentWorker {
    config: AgentConfig,
    defaults: AgentDefaults,
    provider: Arc<dyn LlmProvider>,
    tools: RwLock<Vec<Tool>>,
    /// Bumped on every tool-set change; invalidates the defs cache.
    tools_generation: AtomicU64,
    defs_cache: Mutex<Option<DefsCache>>,
    state: Mutex<SessionState>,
    health: HealthTracker,
    retry: RetryPolicy,
    /// At most one turn in flight per agent.
    turn_lock: tokio::sync::Mutex<()>,
}

impl AgentWorker {
    pub fn new(
        config: AgentConfig,
        defaults: AgentDefaults,
        provider: Arc<dyn LlmProvider>,
        initial_state: Option<SessionState>,
    ) -> Self {
        let retry = RetryPolicy::labeled(format!("agent:{}", config.name));
        let health = HealthTracker::new(format!("agent:{}", config.name));
        Self {
            config,
            defaults,
            provider,
            tools: RwLock::new(Vec::new()),
            tools_generation: AtomicU64::new(0),
            defs_cache: Mutex::new(None),
            state: Mutex::new(initial_state.unwrap_or_default()),
            health,
            retry,
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Override the backoff policy (tests use millisecond delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the tool set; the cached definitions are rebuilt lazily.
    pub fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.write() = tools;
        self.tools_generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn health(&self) -> HealthState {
        self.health.snapshot()
    }

    /// Reset the transcript, usage counters, and approvals.
    pub fn clear(&self) -> SessionState {
        let mut state = self.state.lock();
        *state = SessionState::new();
        state.clone()
    }

    /// Run one turn and wait for the full response.
    pub async fn send(&self, input: &str, opts: &SendOptions) -> Result<AgentResponse> {
        let _turn = self.turn_lock.lock().await;
        self.run_turn(input, opts, None).await
    }

    /// Run one streaming turn. The receiver yields text chunks and ends
    /// with a `Done` (or `Error`) event.
    pub fn send_stream(
        self: Arc<Self>,
        input: String,
        opts: SendOptions,
    ) -> mpsc::Receiver<WorkerEvent> {
        let (tx, rx) = mpsc::channel::<WorkerEvent>(64);
        let worker = self;
        tokio::spawn(async move {
            let _turn = worker.turn_lock.lock().await;
            match worker.run_turn(&input, &opts, Some(&tx)).await {
                Ok(response) => {
                    let _ = tx.send(WorkerEvent::Done(Box::new(response))).await;
                }
                Err(err) => {
                    let classified = classify(&err);
                    let _ = tx
                        .send(WorkerEvent::Error {
                            message: err.to_string(),
                            class: classified.class,
                            retryable: classified.retryable,
                        })
                        .await;
                }
            }
        });
        rx
    }

    // ── Turn execution ─────────────────────────────────────────────

    async fn run_turn(
        &self,
        input: &str,
        opts: &SendOptions,
        chunk_tx: Option<&mpsc::Sender<WorkerEvent>>,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        let streaming = chunk_tx.is_some();

        {
            let mut state = self.state.lock();
            state.messages.push(AgentMessage::complete(Role::User, input));
            if streaming {
                state.messages.push(AgentMessage::responding());
            }
        }

        match self.turn_loop(opts, chunk_tx).await {
            Ok(outcome) => {
                let mut state = self.state.lock();
                if streaming {
                    if let Some(entry) = state
                        .messages
                        .iter_mut()
                        .rev()
                        .find(|m| m.status == MessageStatus::Responding)
                    {
                        entry.content = outcome.content.clone();
                        entry.status = MessageStatus::Complete;
                    }
                } else {
                    state
                        .messages
                        .push(AgentMessage::complete(Role::Assistant, &outcome.content));
                }
                state.total_usage.add(&outcome.usage);

                let pending: Vec<PendingApproval> = state
                    .pending_approvals
                    .iter()
                    .filter(|a| {
                        outcome.approval_ids.contains(&a.id)
                            && a.status == ApprovalStatus::Pending
                    })
                    .cloned()
                    .collect();

                Ok(AgentResponse {
                    content: outcome.content,
                    tool_calls: outcome.invocations,
                    pending_approvals: pending,
                    usage: outcome.usage,
                    latency_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                // Drop the in-flight placeholder so the transcript never
                // ends in a dangling responding entry.
                let mut state = self.state.lock();
                if let Some(last) = state.messages.last() {
                    if last.status == MessageStatus::Responding {
                        state.messages.pop();
                    }
                }
                Err(err)
            }
        }
    }

    async fn turn_loop(
        &self,
        opts: &SendOptions,
        chunk_tx: Option<&mpsc::Sender<WorkerEvent>>,
    ) -> Result<TurnOutcome> {
        let base = self.build_provider_messages();
        let defs = self.tool_definitions();

        let mut messages = base;
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut approval_ids: Vec<String> = Vec::new();
        let mut turn_usage = TokenUsage::default();
        let max_steps = self.defaults.max_steps.max(1);

        for step in 1..=max_steps {
            let req = ChatRequest {
                messages: messages.clone(),
                tools: (*defs).clone(),
                max_tokens: Some(self.defaults.max_tokens),
                model: Some(self.config.model.clone()),
            };

            let mut stream = match with_retry(&self.retry, || {
                self.provider.chat_stream(req.clone())
            })
            .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    self.health.record_failure(&classify(&err));
                    return Err(err);
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut step_usage: Option<TokenUsage> = None;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::Token { text: chunk }) => {
                        if let Some(tx) = chunk_tx {
                            let _ = tx.send(WorkerEvent::Chunk(chunk.clone())).await;
                            // Mirror chunks into the in-place responding entry.
                            let mut state = self.state.lock();
                            if let Some(entry) = state
                                .messages
                                .iter_mut()
                                .rev()
                                .find(|m| m.status == MessageStatus::Responding)
                            {
                                entry.content.push_str(&chunk);
                            }
                        }
                        text.push_str(&chunk);
                    }
                    Ok(StreamEvent::ToolCall(tc)) => calls.push(tc),
                    Ok(StreamEvent::Done { usage, .. }) => step_usage = usage,
                    Ok(StreamEvent::Error { message }) => {
                        let err = Error::provider(self.provider.provider_id(), message);
                        self.health.record_failure(&classify(&err));
                        return Err(err);
                    }
                    Err(err) => {
                        self.health.record_failure(&classify(&err));
                        return Err(err);
                    }
                }
            }

            self.health.record_success();
            if let Some(usage) = &step_usage {
                turn_usage.add(usage);
            }

            // No tool calls — this is the final answer.
            if calls.is_empty() {
                if let Some(cb) = &opts.on_step_finish {
                    cb(StepInfo {
                        step_number: step,
                        tool_calls: Vec::new(),
                        usage: step_usage,
                    });
                }
                return Ok(TurnOutcome {
                    content: text,
                    invocations,
                    approval_ids,
                    usage: turn_usage,
                });
            }

            // ── Tool dispatch ──────────────────────────────────────
            messages.push(ProviderMessage::assistant_with_calls(&text, calls.clone()));

            let mut step_invocations = Vec::new();
            for tc in &calls {
                let tool_start = Instant::now();
                let result = self
                    .execute_tool_call(tc, opts.auto_approve(), &mut approval_ids)
                    .await;
                let result_text =
                    serde_json::to_string(&result).unwrap_or_else(|_| result.to_string());
                messages.push(ProviderMessage::tool_result(&tc.call_id, &result_text));

                let invocation = ToolInvocation {
                    name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                    result,
                    duration_ms: tool_start.elapsed().as_millis() as u64,
                };
                step_invocations.push(invocation.clone());
                invocations.push(invocation);
            }

            if let Some(cb) = &opts.on_step_finish {
                cb(StepInfo {
                    step_number: step,
                    tool_calls: step_invocations,
                    usage: step_usage,
                });
            }

            if step == max_steps {
                // Operational signal, not an error: the model still wanted
                // tools when the cap hit.
                tracing::warn!(
                    agent = %self.config.name,
                    max_steps,
                    "step cap reached with tool calls still pending"
                );
                return Ok(TurnOutcome {
                    content: text,
                    invocations,
                    approval_ids,
                    usage: turn_usage,
                });
            }
        }

        unreachable!("loop either returns or hits the step cap");
    }

    /// Execute one tool call, applying approval gating. Tool failures do
    /// not abort the turn — they surface as the call's result.
    async fn execute_tool_call(
        &self,
        tc: &ToolCall,
        auto_approve: bool,
        approval_ids: &mut Vec<String>,
    ) -> Value {
        let tool = self
            .tools
            .read()
            .iter()
            .find(|t| t.name == tc.tool_name)
            .cloned();

        let Some(tool) = tool else {
            return serde_json::json!({ "error": format!("unknown tool '{}'", tc.tool_name) });
        };

        let gated = !auto_approve
            && tool
                .approval
                .as_ref()
                .map_or(false, |predicate| predicate(&tc.arguments));

        if gated {
            let approval =
                PendingApproval::new(&tool.name, &tc.call_id, tc.arguments.clone());
            let id = approval.id.clone();
            self.state.lock().pending_approvals.push(approval);
            approval_ids.push(id.clone());
            tracing::info!(agent = %self.config.name, tool = %tool.name, approval = %id, "tool call gated");
            return serde_json::json!({ "approvalRequired": true, "approvalId": id });
        }

        match (tool.execute)(tc.arguments.clone()).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    agent = %self.config.name,
                    tool = %tool.name,
                    error = %err,
                    "tool execution failed"
                );
                serde_json::json!({ "error": err.to_string() })
            }
        }
    }

    // ── Approvals ──────────────────────────────────────────────────

    /// Execute a gated call and mark it approved. Rejects unknown and
    /// already-resolved ids.
    pub async fn approve(&self, approval_id: &str) -> Result<Value> {
        let (tool_name, arguments) = {
            let state = self.state.lock();
            let approval = state
                .pending_approvals
                .iter()
                .find(|a| a.id == approval_id)
                .ok_or_else(|| Error::NotFound(format!("approval '{approval_id}' not found")))?;
            if approval.status != ApprovalStatus::Pending {
                return Err(Error::Conflict(format!(
                    "approval '{approval_id}' is already resolved"
                )));
            }
            (approval.tool_name.clone(), approval.arguments.clone())
        };

        let tool = self
            .tools
            .read()
            .iter()
            .find(|t| t.name == tool_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tool '{tool_name}' no longer exists")))?;

        let result = (tool.execute)(arguments).await?;

        let mut state = self.state.lock();
        if let Some(approval) = state
            .pending_approvals
            .iter_mut()
            .find(|a| a.id == approval_id)
        {
            approval.status = ApprovalStatus::Approved;
        }
        Ok(result)
    }

    /// Mark a gated call denied. Rejects unknown and already-resolved ids.
    pub fn deny(&self, approval_id: &str, reason: Option<String>) -> Result<()> {
        let mut state = self.state.lock();
        let approval = state
            .pending_approvals
            .iter_mut()
            .find(|a| a.id == approval_id)
            .ok_or_else(|| Error::NotFound(format!("approval '{approval_id}' not found")))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(Error::Conflict(format!(
                "approval '{approval_id}' is already resolved"
            )));
        }
        approval.status = ApprovalStatus::Denied;
        approval.deny_reason = reason;
        Ok(())
    }

    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.state
            .lock()
            .pending_approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Provider input: the system prompt plus every complete transcript
    /// entry. The in-flight responding entry is never sent.
    fn build_provider_messages(&self) -> Vec<ProviderMessage> {
        let state = self.state.lock();
        let mut messages = vec![ProviderMessage::system(&self.config.system)];
        for entry in &state.messages {
            if entry.status != MessageStatus::Complete {
                continue;
            }
            let role = match entry.role {
                Role::User => Role::User,
                Role::Assistant => Role::Assistant,
                Role::System => Role::System,
                Role::Tool => continue,
            };
            messages.push(ProviderMessage {
                role,
                content: entry.content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        messages
    }

    fn tool_definitions(&self) -> Arc<Vec<ToolDefinition>> {
        let generation = self.tools_generation.load(Ordering::SeqCst);
        let mut cache = self.defs_cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.generation == generation {
                return cached.defs.clone();
            }
        }
        let defs = Arc::new(
            self.tools
                .read()
                .iter()
                .map(Tool::definition)
                .collect::<Vec<_>>(),
        );
        *cache = Some(DefsCache {
            generation,
            defs: defs.clone(),
        });
        defs
    }
}

struct TurnOutcome {
    content: String,
    invocations: Vec<ToolInvocation>,
    approval_ids: Vec<String>,
    usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_providers::mock::{MockProvider, MockTurn};
    use std::sync::atomic::AtomicBool;

    fn make_config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.into(),
            model: "test-model".into(),
            system: "be brief".into(),
            backend: "mock".into(),
            workflow: String::new(),
            tag: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    fn make_worker(provider: MockProvider) -> Arc<AgentWorker> {
        Arc::new(AgentWorker::new(
            make_config("alice"),
            AgentDefaults::default(),
            Arc::new(provider),
            None,
        ))
    }

    #[tokio::test]
    async fn simple_send_appends_user_and_assistant() {
        let worker = make_worker(MockProvider::echo());
        let resp = worker.send("hello", &SendOptions::default()).await.unwrap();

        assert_eq!(resp.content, "ack: hello");
        assert!(resp.tool_calls.is_empty());
        assert!(resp.usage.total > 0);

        let state = worker.state();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert!(state
            .messages
            .iter()
            .all(|m| m.status == MessageStatus::Complete));
        assert_eq!(state.total_usage, resp.usage);
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let worker = make_worker(MockProvider::echo());
        let first = worker.send("one", &SendOptions::default()).await.unwrap();
        let before = worker.state().total_usage;
        worker.send("two", &SendOptions::default()).await.unwrap();
        let after = worker.state().total_usage;
        assert!(after.total > before.total);
        assert!(before.total >= first.usage.total);
    }

    #[tokio::test]
    async fn tool_loop_executes_and_records_invocations() {
        let provider = MockProvider::scripted([
            MockTurn::tool_call("lookup", serde_json::json!({ "q": "weather" })),
            MockTurn::text("it is sunny"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "lookup",
            "Look something up",
            serde_json::json!({ "type": "object" }),
            |args| async move { Ok(serde_json::json!({ "answer": args["q"] })) },
        )]);

        let resp = worker.send("weather?", &SendOptions::default()).await.unwrap();
        assert_eq!(resp.content, "it is sunny");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "lookup");
        assert_eq!(resp.tool_calls[0].result["answer"], "weather");
    }

    #[tokio::test]
    async fn tool_errors_stay_inside_the_turn() {
        let provider = MockProvider::scripted([
            MockTurn::tool_call("flaky", serde_json::json!({})),
            MockTurn::text("recovered"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "flaky",
            "Always fails",
            serde_json::json!({ "type": "object" }),
            |_| async move { Err::<Value, _>(Error::Other("tool exploded".into())) },
        )]);

        let resp = worker.send("go", &SendOptions::default()).await.unwrap();
        assert_eq!(resp.content, "recovered");
        assert!(resp.tool_calls[0].result["error"]
            .as_str()
            .unwrap()
            .contains("tool exploded"));
    }

    #[tokio::test]
    async fn approval_gate_defers_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_in_tool = executed.clone();

        let provider = MockProvider::scripted([
            MockTurn::tool_call("delete_file", serde_json::json!({ "path": "/tmp/x" })),
            MockTurn::text("awaiting approval"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "delete_file",
            "Delete a file",
            serde_json::json!({ "type": "object" }),
            move |_| {
                let executed = executed_in_tool.clone();
                async move {
                    executed.store(true, Ordering::SeqCst);
                    Ok(serde_json::json!({ "deleted": true }))
                }
            },
        )
        .with_approval(|_| true)]);

        let opts = SendOptions { no_auto_approve: true, ..Default::default() };
        let resp = worker.send("clean up", &opts).await.unwrap();

        // The tool was NOT executed; a pending approval was recorded.
        assert!(!executed.load(Ordering::SeqCst));
        assert_eq!(resp.pending_approvals.len(), 1);
        let approval_id = resp.pending_approvals[0].id.clone();
        assert_eq!(resp.tool_calls[0].result["approvalRequired"], true);

        // Approve runs the real tool and returns its result.
        let result = worker.approve(&approval_id).await.unwrap();
        assert!(executed.load(Ordering::SeqCst));
        assert_eq!(result["deleted"], true);

        // A second resolution throws.
        assert!(matches!(
            worker.approve(&approval_id).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            worker.deny(&approval_id, None),
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn auto_approve_bypasses_the_gate() {
        let provider = MockProvider::scripted([
            MockTurn::tool_call("delete_file", serde_json::json!({ "path": "/tmp/x" })),
            MockTurn::text("done"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "delete_file",
            "Delete a file",
            serde_json::json!({ "type": "object" }),
            |_| async move { Ok(serde_json::json!({ "deleted": true })) },
        )
        .with_approval(|_| true)]);

        let resp = worker.send("clean up", &SendOptions::default()).await.unwrap();
        assert!(resp.pending_approvals.is_empty());
        assert_eq!(resp.tool_calls[0].result["deleted"], true);
    }

    #[tokio::test]
    async fn deny_records_reason() {
        let provider = MockProvider::scripted([
            MockTurn::tool_call("delete_file", serde_json::json!({})),
            MockTurn::text("ok"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "delete_file",
            "Delete a file",
            serde_json::json!({ "type": "object" }),
            |_| async move { Ok(Value::Null) },
        )
        .with_approval(|_| true)]);

        let opts = SendOptions { no_auto_approve: true, ..Default::default() };
        let resp = worker.send("go", &opts).await.unwrap();
        let id = resp.pending_approvals[0].id.clone();

        worker.deny(&id, Some("too risky".into())).unwrap();
        let state = worker.state();
        let approval = state.pending_approvals.iter().find(|a| a.id == id).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Denied);
        assert_eq!(approval.deny_reason.as_deref(), Some("too risky"));
    }

    #[tokio::test]
    async fn streaming_turn_finalizes_responding_entry() {
        let provider = MockProvider::scripted([MockTurn::text("streamed words here")]);
        let worker = make_worker(provider);

        let mut rx = worker.clone().send_stream("hi".into(), SendOptions::default());
        let mut chunks = String::new();
        let mut done: Option<AgentResponse> = None;
        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Chunk(c) => chunks.push_str(&c),
                WorkerEvent::Done(resp) => done = Some(*resp),
                WorkerEvent::Error { message, .. } => panic!("unexpected error: {message}"),
            }
        }

        let resp = done.unwrap();
        assert_eq!(resp.content, "streamed words here");
        assert_eq!(chunks, resp.content);

        let state = worker.state();
        assert!(state
            .messages
            .iter()
            .all(|m| m.status == MessageStatus::Complete));
        assert_eq!(state.messages.last().unwrap().content, "streamed words here");
    }

    #[tokio::test]
    async fn transient_provider_failures_are_retried() {
        let provider = MockProvider::scripted([MockTurn::text("made it")])
            .failing_first([Error::Timeout("connect timed out".into())]);
        let worker = Arc::new(
            AgentWorker::new(
                make_config("alice"),
                AgentDefaults::default(),
                Arc::new(provider),
                None,
            )
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 4,
                label: Some("test".into()),
            }),
        );
        let resp = worker.send("hi", &SendOptions::default()).await.unwrap();
        assert_eq!(resp.content, "made it");
        assert_eq!(worker.health().status, aw_providers::health::HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn auth_failures_propagate_and_mark_unavailable() {
        let provider = MockProvider::echo().failing_first([Error::Provider {
            provider: "mock".into(),
            message: "invalid api key".into(),
            status: Some(401),
            code: None,
        }]);
        let worker = make_worker(provider);

        let err = worker.send("hi", &SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(
            worker.health().status,
            aw_providers::health::HealthStatus::Unavailable
        );
        // Failed turn leaves only the user entry; no dangling assistant.
        let state = worker.state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn step_cap_stops_runaway_tool_loops() {
        let mut defaults = AgentDefaults::default();
        defaults.max_steps = 2;

        // Script more tool-call steps than the cap allows.
        let provider = MockProvider::scripted([
            MockTurn::tool_call("noop", serde_json::json!({})),
            MockTurn::tool_call("noop", serde_json::json!({})),
            MockTurn::tool_call("noop", serde_json::json!({})),
        ]);
        let worker = Arc::new(AgentWorker::new(
            make_config("alice"),
            defaults,
            Arc::new(provider),
            None,
        ));
        worker.set_tools(vec![Tool::new(
            "noop",
            "Do nothing",
            serde_json::json!({ "type": "object" }),
            |_| async move { Ok(Value::Null) },
        )]);

        let resp = worker.send("loop", &SendOptions::default()).await.unwrap();
        // Two steps ran, then the cap hit — a warning, not an error.
        assert_eq!(resp.tool_calls.len(), 2);
    }

    #[tokio::test]
    async fn on_step_finish_fires_per_step() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let steps_cb = steps.clone();

        let provider = MockProvider::scripted([
            MockTurn::tool_call("noop", serde_json::json!({})),
            MockTurn::text("done"),
        ]);
        let worker = make_worker(provider);
        worker.set_tools(vec![Tool::new(
            "noop",
            "Do nothing",
            serde_json::json!({ "type": "object" }),
            |_| async move { Ok(Value::Null) },
        )]);

        let opts = SendOptions {
            on_step_finish: Some(Arc::new(move |info: StepInfo| {
                steps_cb.lock().push((info.step_number, info.tool_calls.len()));
            })),
            ..Default::default()
        };
        worker.send("go", &opts).await.unwrap();

        let recorded = steps.lock().clone();
        assert_eq!(recorded, vec![(1, 1), (2, 0)]);
    }

    #[tokio::test]
    async fn restored_state_feeds_next_turn() {
        let mut prior = SessionState::new();
        prior
            .messages
            .push(AgentMessage::complete(Role::User, "remember: blue"));
        prior
            .messages
            .push(AgentMessage::complete(Role::Assistant, "noted"));

        let worker = Arc::new(AgentWorker::new(
            make_config("alice"),
            AgentDefaults::default(),
            Arc::new(MockProvider::echo()),
            Some(prior.clone()),
        ));

        let state = worker.state();
        assert_eq!(state.id, prior.id);
        assert_eq!(state.messages.len(), 2);

        worker.send("and?", &SendOptions::default()).await.unwrap();
        assert_eq!(worker.state().messages.len(), 4);
    }

    #[tokio::test]
    async fn clear_resets_transcript_and_usage() {
        let worker = make_worker(MockProvider::echo());
        worker.send("hi", &SendOptions::default()).await.unwrap();
        assert!(!worker.state().messages.is_empty());

        let cleared = worker.clear();
        assert!(cleared.messages.is_empty());
        assert_eq!(cleared.total_usage, TokenUsage::default());
    }
}
