//! Scripted in-process provider.
//!
//! Serves two purposes: a zero-dependency `mock` backend for local
//! development, and a deterministic fixture for worker/turn tests (scripted
//! responses, scripted tool calls, injected failures).

use std::collections::VecDeque;

use futures_util::stream;
use parking_lot::Mutex;

use aw_domain::error::{Error, Result};
use aw_domain::message::{Role, TokenUsage};
use aw_domain::stream::{BoxStream, StreamEvent};
use aw_domain::tool::ToolCall;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// One scripted model step.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl MockTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let name = name.into();
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                tool_name: name,
                arguments,
            }],
        }
    }
}

/// A provider that replays a script, then echoes.
pub struct MockProvider {
    script: Mutex<VecDeque<MockTurn>>,
    failures: Mutex<VecDeque<Error>>,
}

impl MockProvider {
    /// Echo the last user message back. The dev-mode `mock` backend.
    pub fn echo() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Replay the given steps in order, then fall back to echoing.
    pub fn scripted(turns: impl IntoIterator<Item = MockTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().collect()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next calls with the given errors (consumed in order) before
    /// serving scripted/echo responses.
    pub fn failing_first(mut self, errors: impl IntoIterator<Item = Error>) -> Self {
        self.failures = Mutex::new(errors.into_iter().collect());
        self
    }

    fn next_response(&self, req: &ChatRequest) -> Result<ChatResponse> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let turn = self.script.lock().pop_front().unwrap_or_else(|| {
            let last_user = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("");
            MockTurn::text(format!("ack: {last_user}"))
        });

        let output_tokens = (turn.content.len() as u64 / 4).max(1);
        let input_tokens = req
            .messages
            .iter()
            .map(|m| m.content.len() as u64 / 4)
            .sum::<u64>()
            .max(1);

        Ok(ChatResponse {
            content: turn.content,
            tool_calls: turn.tool_calls,
            usage: Some(TokenUsage {
                input: input_tokens,
                output: output_tokens,
                total: input_tokens + output_tokens,
            }),
            finish_reason: Some("stop".into()),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.next_response(&req)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.next_response(&req)?;

        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        // Chunk the content on word boundaries to exercise streaming paths.
        let mut rest = resp.content.as_str();
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .find(|(i, c)| *i > 0 && c.is_whitespace())
                .map(|(i, _)| i + 1)
                .unwrap_or(rest.len());
            let (chunk, tail) = rest.split_at(cut.min(rest.len()));
            events.push(Ok(StreamEvent::Token {
                text: chunk.to_string(),
            }));
            rest = tail;
        }
        for tc in resp.tool_calls {
            events.push(Ok(StreamEvent::ToolCall(tc)));
        }
        events.push(Ok(StreamEvent::Done {
            usage: resp.usage,
            finish_reason: resp.finish_reason,
        }));

        Ok(Box::pin(stream::iter(events)))
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_domain::tool::ProviderMessage;
    use futures_util::StreamExt;

    fn user_req(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ProviderMessage::system("sys"), ProviderMessage::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn echo_replies_with_last_user_message() {
        let p = MockProvider::echo();
        let resp = p.chat(user_req("hello there")).await.unwrap();
        assert_eq!(resp.content, "ack: hello there");
        assert!(resp.usage.unwrap().total > 0);
    }

    #[tokio::test]
    async fn script_is_consumed_in_order() {
        let p = MockProvider::scripted([MockTurn::text("first"), MockTurn::text("second")]);
        assert_eq!(p.chat(user_req("a")).await.unwrap().content, "first");
        assert_eq!(p.chat(user_req("b")).await.unwrap().content, "second");
        // Exhausted → echo.
        assert_eq!(p.chat(user_req("c")).await.unwrap().content, "ack: c");
    }

    #[tokio::test]
    async fn stream_reassembles_to_full_content() {
        let p = MockProvider::scripted([MockTurn::text("one two three")]);
        let mut stream = p.chat_stream(user_req("x")).await.unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Token { text: t } => text.push_str(&t),
                StreamEvent::Done { usage, .. } => {
                    saw_done = true;
                    assert!(usage.is_some());
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(text, "one two three");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn failures_are_served_before_script() {
        let p = MockProvider::scripted([MockTurn::text("after")])
            .failing_first([Error::Timeout("boom".into())]);
        assert!(p.chat(user_req("x")).await.is_err());
        assert_eq!(p.chat(user_req("x")).await.unwrap().content, "after");
    }

    #[tokio::test]
    async fn scripted_tool_calls_come_through_stream() {
        let p = MockProvider::scripted([MockTurn::tool_call(
            "lookup",
            serde_json::json!({ "q": "rust" }),
        )]);
        let mut stream = p.chat_stream(user_req("x")).await.unwrap();
        let mut calls = 0;
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCall(tc) = event.unwrap() {
                assert_eq!(tc.tool_name, "lookup");
                calls += 1;
            }
        }
        assert_eq!(calls, 1);
    }
}
