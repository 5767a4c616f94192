use serde::Serialize;
use std::pin::Pin;

use crate::message::TokenUsage;
use crate::tool::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text token chunk.
    Token { text: String },

    /// A fully-assembled tool call from the model.
    ToolCall(ToolCall),

    /// Stream is finished.
    Done {
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}
