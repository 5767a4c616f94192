//! Error classification — maps any fault to a class with a retryable flag.
//!
//! Decision order (first match wins):
//! 1. numeric HTTP status (401/403 auth, 429 transient, 5xx transient);
//! 2. network error code (ECONNRESET, ETIMEDOUT, …) → transient;
//! 3. explicit timeout → transient;
//! 4. case-insensitive message patterns, with the rate-limit set evaluated
//!    **before** the resource set ("rate limit exceeded" must not match
//!    resource's "exceeded" patterns);
//! 5. everything else → unknown, not retryable.

use serde::Serialize;

use aw_domain::error::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Retryable: network flaps, 5xx, rate limits, overload.
    Transient,
    /// Credentials problem; retrying cannot help.
    Auth,
    /// Quota/budget/context-length exhaustion; retrying cannot help.
    Resource,
    /// Unclassified; not retried.
    Unknown,
}

/// The result of classifying one fault.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub retryable: bool,
}

impl ClassifiedError {
    fn new(class: ErrorClass, message: String, status: Option<u16>) -> Self {
        let retryable = class == ErrorClass::Transient;
        Self {
            class,
            message,
            status,
            retryable,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Low-level network error codes that always mean "try again".
const NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "EPIPE",
    "EAI_AGAIN",
    "EHOSTUNREACH",
    "ENETUNREACH",
];

/// Checked before `RESOURCE_PATTERNS`; order is load-bearing.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests"];

const RESOURCE_PATTERNS: &[&str] = &[
    "quota exceeded",
    "token length exceeded",
    "context length exceeded",
    "billing",
    "insufficient_quota",
    "budget",
    "credit",
    "too many tokens",
    "max_tokens",
];

const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "invalid api key",
    "authentication failed",
    "forbidden",
    "permission denied",
    "access denied",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network error",
    "socket hang up",
    "fetch failed",
    "server error",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "overloaded",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classify a fault into an [`ErrorClass`] with a retryable flag.
pub fn classify(err: &Error) -> ClassifiedError {
    let message = err.to_string();

    // 1. Numeric status takes precedence over everything.
    if let Error::Provider {
        status: Some(status),
        ..
    } = err
    {
        match status {
            401 | 403 => return ClassifiedError::new(ErrorClass::Auth, message, Some(*status)),
            429 => return ClassifiedError::new(ErrorClass::Transient, message, Some(*status)),
            500..=599 => {
                return ClassifiedError::new(ErrorClass::Transient, message, Some(*status))
            }
            _ => {}
        }
    }

    // 2. Network error codes.
    if let Error::Provider {
        code: Some(code), ..
    } = err
    {
        if NETWORK_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)) {
            return ClassifiedError::new(ErrorClass::Transient, message, status_of(err));
        }
    }
    if let Error::Io(io) = err {
        if io_is_network_flap(io) {
            return ClassifiedError::new(ErrorClass::Transient, message, None);
        }
    }

    // 3. Explicit timeout.
    if matches!(err, Error::Timeout(_)) {
        return ClassifiedError::new(ErrorClass::Transient, message, None);
    }

    // 4. Message patterns, in order: rate-limit, resource, auth, transient.
    let lower = message.to_lowercase();
    let class = if matches_any(&lower, RATE_LIMIT_PATTERNS) {
        ErrorClass::Transient
    } else if matches_any(&lower, RESOURCE_PATTERNS) {
        ErrorClass::Resource
    } else if matches_any(&lower, AUTH_PATTERNS) {
        ErrorClass::Auth
    } else if matches_any(&lower, TRANSIENT_PATTERNS) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    };

    ClassifiedError::new(class, message, status_of(err))
}

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

fn status_of(err: &Error) -> Option<u16> {
    match err {
        Error::Provider { status, .. } => *status,
        _ => None,
    }
}

/// Map `std::io::ErrorKind`s onto the network-flap set.
fn io_is_network_flap(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
    )
}
