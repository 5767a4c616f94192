//! Conversation transcript and per-agent state types.
//!
//! An agent's transcript is a flat list of [`AgentMessage`]s. While a
//! streaming turn is in flight exactly one trailing assistant entry has
//! status [`MessageStatus::Responding`] and is updated in place; only
//! [`MessageStatus::Complete`] entries are ever sent back to the provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Being assembled by an in-flight streaming turn.
    Responding,
    /// Finalized; eligible to be sent to the provider on later turns.
    Complete,
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn complete(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            status: MessageStatus::Complete,
            timestamp: Utc::now(),
        }
    }

    /// An empty in-flight assistant entry, filled in chunk by chunk.
    pub fn responding() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Responding,
            timestamp: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage counters, additive across turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-turn tool activity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool invocation within a turn. Collected into the turn's response,
/// not persisted separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    pub duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// A gated tool call waiting for an explicit approve/deny decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool_name: String,
    /// The provider-assigned call id of the gated invocation.
    pub tool_call_id: String,
    pub arguments: Value,
    pub requested_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

impl PendingApproval {
    pub fn new(tool_name: impl Into<String>, tool_call_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("appr-{}", uuid::Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            arguments,
            requested_at: Utc::now(),
            status: ApprovalStatus::Pending,
            deny_reason: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persistable unit of one agent's conversation: transcript, usage
/// counters, and outstanding approvals. Written to the state store after
/// every completed turn and on explicit clear; never mid-turn, so stored
/// state has no dangling `responding` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<AgentMessage>,
    pub total_usage: TokenUsage,
    pub pending_approvals: Vec<PendingApproval>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
            total_usage: TokenUsage::default(),
            pending_approvals: Vec::new(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of one `send`/`send_stream` turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    /// Approvals created this turn that are still unresolved.
    pub pending_approvals: Vec<PendingApproval>,
    pub usage: TokenUsage,
    /// Wall time of the turn, from a monotonic clock.
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_additive() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage { input: 10, output: 5, total: 15 });
        total.add(&TokenUsage { input: 1, output: 2, total: 3 });
        assert_eq!(total, TokenUsage { input: 11, output: 7, total: 18 });
    }

    #[test]
    fn responding_entry_is_empty_assistant() {
        let m = AgentMessage::responding();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.status, MessageStatus::Responding);
        assert!(m.content.is_empty());
    }

    #[test]
    fn session_state_roundtrips_through_json() {
        let mut state = SessionState::new();
        state.messages.push(AgentMessage::complete(Role::User, "hi"));
        state.messages.push(AgentMessage::complete(Role::Assistant, "hello"));
        state.total_usage = TokenUsage { input: 3, output: 4, total: 7 };
        state.pending_approvals.push(PendingApproval::new(
            "delete_file",
            "call_1",
            serde_json::json!({ "path": "/tmp/x" }),
        ));

        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, state.id);
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.total_usage, state.total_usage);
        assert_eq!(back.pending_approvals.len(), 1);
        assert_eq!(back.pending_approvals[0].status, ApprovalStatus::Pending);
    }

    #[test]
    fn approval_ids_are_unique() {
        let a = PendingApproval::new("t", "c1", Value::Null);
        let b = PendingApproval::new("t", "c2", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("appr-"));
    }
}
