//! Provider-agnostic tool and message shapes.
//!
//! Tools are dynamic: a JSON-Schema-like input description plus an async
//! execute closure. Handlers never reflect on `execute` — they call it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-facing conversation types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// One message in a provider request. Flat shape: assistant messages may
/// carry tool calls, tool messages carry the call id they answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: crate::message::Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ProviderMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(crate::message::Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(crate::message::Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(crate::message::Role::Assistant, text)
    }

    /// An assistant step that invoked tools.
    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: crate::message::Role::Assistant,
            content: text.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// The result of one tool call, addressed back to the model.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: crate::message::Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: crate::message::Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executable tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Boxed future returned by a tool's execute closure.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// The execute contract of a tool.
pub type ExecuteFn = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Approval predicate: `true` means this invocation must be gated when
/// auto-approve is off.
pub type ApprovalFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// An executable tool an agent may call.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub execute: ExecuteFn,
    pub approval: Option<ApprovalFn>,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        execute: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            execute: Arc::new(move |args| Box::pin(execute(args))),
            approval: None,
        }
    }

    /// Attach an approval predicate.
    pub fn with_approval<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.approval = Some(Arc::new(predicate));
        self
    }

    /// The provider-facing definition. Unaffected by approval gating.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("gated", &self.approval.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> Tool {
        Tool::new(
            "echo",
            "Echo the input back",
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } }),
            |args| async move { Ok(args) },
        )
    }

    #[tokio::test]
    async fn execute_runs_the_closure() {
        let tool = echo_tool();
        let out = (tool.execute)(serde_json::json!({ "text": "hi" })).await.unwrap();
        assert_eq!(out["text"], "hi");
    }

    #[test]
    fn definition_carries_schema_unchanged() {
        let tool = echo_tool().with_approval(|_| true);
        let def = tool.definition();
        assert_eq!(def.name, "echo");
        assert!(def.parameters["properties"]["text"].is_object());
    }

    #[test]
    fn tool_result_message_targets_call_id() {
        let msg = ProviderMessage::tool_result("call_7", "done");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(msg.role, crate::message::Role::Tool);
    }
}
