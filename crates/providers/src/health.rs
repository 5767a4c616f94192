//! Provider health tracking — a three-state machine fed by classified
//! success/failure events.
//!
//! Transient failures degrade gradually (threshold `T` consecutive failures
//! before `unavailable`); auth and resource failures jump straight to
//! `unavailable`; unknown failures degrade but never escalate on their own;
//! any success snaps back to `healthy`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::classify::{ClassifiedError, ErrorClass};

/// Default consecutive-failure threshold before `unavailable`.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// The last recorded failure, with its classification.
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of one tracker's state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    pub total_failures: u64,
    pub total_successes: u64,
}

impl HealthState {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe health tracker for one agent/provider pairing.
pub struct HealthTracker {
    label: String,
    threshold: u32,
    state: Mutex<HealthState>,
}

impl HealthTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_threshold(label, DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(label: impl Into<String>, threshold: u32) -> Self {
        Self {
            label: label.into(),
            threshold,
            state: Mutex::new(HealthState::new()),
        }
    }

    /// Record a successful operation: any status snaps back to healthy.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        let prior = state.status;
        state.status = HealthStatus::Healthy;
        state.consecutive_failures = 0;
        state.last_success = Some(Utc::now());
        state.total_successes += 1;
        if prior != HealthStatus::Healthy {
            tracing::info!(
                label = %self.label,
                from = ?prior,
                "health recovered"
            );
        }
    }

    /// Record a classified failure and transition the state machine.
    pub fn record_failure(&self, err: &ClassifiedError) {
        let mut state = self.state.lock();
        let prior = state.status;
        let prior_failures = state.consecutive_failures;

        state.consecutive_failures += 1;
        state.total_failures += 1;
        state.last_error = Some(LastError {
            class: err.class,
            message: err.message.clone(),
            at: Utc::now(),
        });

        state.status = match err.class {
            // Transient faults degrade first, then trip unavailable once
            // the run of consecutive failures reaches the threshold.
            ErrorClass::Transient => {
                if prior == HealthStatus::Unavailable || prior_failures >= self.threshold - 1 {
                    HealthStatus::Unavailable
                } else {
                    HealthStatus::Degraded
                }
            }
            // Credentials and quota problems will not fix themselves.
            ErrorClass::Auth | ErrorClass::Resource => HealthStatus::Unavailable,
            // Unknown faults degrade but never escalate on their own.
            ErrorClass::Unknown => {
                if prior == HealthStatus::Unavailable {
                    HealthStatus::Unavailable
                } else {
                    HealthStatus::Degraded
                }
            }
        };

        if state.status != prior {
            tracing::warn!(
                label = %self.label,
                from = ?prior,
                to = ?state.status,
                consecutive_failures = state.consecutive_failures,
                class = ?err.class,
                "health transition"
            );
        }
    }

    pub fn snapshot(&self) -> HealthState {
        self.state.lock().clone()
    }
}
