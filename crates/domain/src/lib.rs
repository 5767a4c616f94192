//! Shared types for the agent-worker daemon: errors, configuration, the
//! conversation data model, the tool contract, provider stream events, and
//! the schedule/cron grammar.

pub mod agent;
pub mod config;
pub mod cron;
pub mod error;
pub mod message;
pub mod schedule;
pub mod stream;
pub mod tool;

pub use agent::AgentConfig;
pub use error::{Error, Result};
pub use message::{
    AgentMessage, AgentResponse, ApprovalStatus, MessageStatus, PendingApproval, Role,
    SessionState, TokenUsage, ToolInvocation,
};
pub use schedule::{ResolvedSchedule, ScheduleConfig, WakeupSpec};
pub use stream::{BoxStream, StreamEvent};
pub use tool::{ProviderMessage, Tool, ToolCall, ToolDefinition};
