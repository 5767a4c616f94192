//! Daemon configuration.
//!
//! Loaded from TOML (every field defaulted) and overridable by CLI flags.
//! `validate` reports issues before the daemon binds; errors abort startup,
//! warnings are logged and tolerated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agents: AgentDefaults,
    #[serde(default)]
    pub store: StoreConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Bearer token required on every endpoint. `None` = no auth (dev mode).
    #[serde(default)]
    pub token: Option<String>,
    /// Override for the registry directory (default `~/.agent-worker`).
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            token: None,
            config_dir: None,
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    7070
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-agent defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Backend used when an agent is created without one.
    #[serde(default = "d_backend")]
    pub backend: String,
    /// Idle shutdown timeout in milliseconds. `0` disables.
    #[serde(default = "d_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Token cap per provider call.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Step cap per turn (provider tool-loop iterations).
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            backend: d_backend(),
            idle_timeout_ms: d_idle_timeout_ms(),
            max_tokens: d_max_tokens(),
            max_steps: d_max_steps(),
        }
    }
}

fn d_backend() -> String {
    "mock".into()
}

fn d_idle_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn d_max_tokens() -> u32 {
    4096
}

fn d_max_steps() -> u32 {
    200
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "server.host must not be empty".into(),
            });
        }
        if let Some(token) = &self.server.token {
            if token.len() < 16 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: "server.token is shorter than 16 characters".into(),
                });
            }
        }
        if self.agents.max_steps == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agents.max_steps must be positive".into(),
            });
        }

        issues
    }
}
