/// Shared error type used across all agent-worker crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        /// HTTP status reported by the provider, when known.
        status: Option<u16>,
        /// Low-level error code (e.g. `ECONNRESET`), when known.
        code: Option<String>,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("bad schedule: {0}")]
    BadSchedule(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("agent busy: {0}")]
    Busy(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for provider faults without status/code detail.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status: None,
            code: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
