//! Wakeup schedule grammar.
//!
//! A schedule's `wakeup` value is one of:
//! - a positive integer — an idle interval in milliseconds;
//! - a duration literal (`500ms`, `30 s`, `1.5h`, …) — an idle interval;
//! - any other string — a 5-field cron expression (fixed schedule).
//!
//! The grammar overlaps: a bare `"5"` has no unit, would parse as cron, and
//! fails the 5-field check — such inputs are rejected explicitly with a
//! message naming all three accepted forms.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cron::parse_cron;
use crate::error::{Error, Result};

/// Matches a duration literal: number (optionally fractional), optional
/// whitespace, unit.
fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*(ms|s|m|h|d)$").unwrap())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw wakeup value as it arrives over the wire: number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WakeupSpec {
    Millis(u64),
    Text(String),
}

/// A schedule as configured on a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub wakeup: WakeupSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// A schedule after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSchedule {
    /// Fire after `ms` of inactivity; reset by external activity.
    Interval { ms: u64, prompt: Option<String> },
    /// Fire at cron instants regardless of recent activity.
    Cron { expr: String, prompt: Option<String> },
}

impl ScheduleConfig {
    /// Resolve the raw wakeup value into an interval or cron schedule.
    pub fn resolve(&self) -> Result<ResolvedSchedule> {
        let prompt = self.prompt.clone();
        match &self.wakeup {
            WakeupSpec::Millis(0) => Err(Error::BadSchedule(
                "wakeup interval must be positive".into(),
            )),
            WakeupSpec::Millis(ms) => Ok(ResolvedSchedule::Interval { ms: *ms, prompt }),
            WakeupSpec::Text(text) => resolve_text(text.trim(), prompt),
        }
    }
}

fn resolve_text(text: &str, prompt: Option<String>) -> Result<ResolvedSchedule> {
    if let Some(caps) = duration_re().captures(text) {
        let amount: f64 = caps[1]
            .parse()
            .map_err(|_| Error::BadSchedule(format!("invalid duration '{text}'")))?;
        let unit_ms: f64 = match &caps[2] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            _ => unreachable!(),
        };
        let ms = (amount * unit_ms).round() as u64;
        if ms == 0 {
            return Err(Error::BadSchedule(
                "wakeup interval must be positive".into(),
            ));
        }
        return Ok(ResolvedSchedule::Interval { ms, prompt });
    }

    // Not a duration literal — must be a cron expression. A bare number
    // ("5") lands here and fails the field count, which is intentional.
    match parse_cron(text) {
        Ok(_) => Ok(ResolvedSchedule::Cron {
            expr: text.to_string(),
            prompt,
        }),
        Err(_) => Err(Error::BadSchedule(format!(
            "invalid wakeup '{text}': expected number(ms), duration, or 5-field cron"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(wakeup: WakeupSpec) -> Result<ResolvedSchedule> {
        ScheduleConfig { wakeup, prompt: None }.resolve()
    }

    #[test]
    fn number_resolves_to_interval() {
        let r = resolve(WakeupSpec::Millis(45_000)).unwrap();
        assert_eq!(r, ResolvedSchedule::Interval { ms: 45_000, prompt: None });
    }

    #[test]
    fn zero_is_rejected() {
        assert!(resolve(WakeupSpec::Millis(0)).is_err());
        assert!(resolve(WakeupSpec::Text("0s".into())).is_err());
    }

    #[test]
    fn duration_literals_resolve_to_intervals() {
        let cases = [
            ("500ms", 500),
            ("30s", 30_000),
            ("5 m", 300_000),
            ("1.5h", 5_400_000),
            ("2d", 172_800_000),
        ];
        for (text, ms) in cases {
            let r = resolve(WakeupSpec::Text(text.into())).unwrap();
            assert_eq!(r, ResolvedSchedule::Interval { ms, prompt: None }, "{text}");
        }
    }

    #[test]
    fn cron_string_resolves_to_cron() {
        let r = resolve(WakeupSpec::Text("30 10 * * *".into())).unwrap();
        assert!(matches!(r, ResolvedSchedule::Cron { ref expr, .. } if expr == "30 10 * * *"));
    }

    #[test]
    fn unitless_number_string_is_rejected_with_guidance() {
        let err = resolve(WakeupSpec::Text("5".into())).unwrap_err();
        assert!(err.to_string().contains("expected number(ms), duration, or 5-field cron"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(resolve(WakeupSpec::Text("every tuesday".into())).is_err());
    }

    #[test]
    fn prompt_survives_resolution() {
        let cfg = ScheduleConfig {
            wakeup: WakeupSpec::Text("10m".into()),
            prompt: Some("check the queue".into()),
        };
        match cfg.resolve().unwrap() {
            ResolvedSchedule::Interval { prompt, .. } => {
                assert_eq!(prompt.as_deref(), Some("check the queue"));
            }
            other => panic!("expected interval, got {other:?}"),
        }
    }

    #[test]
    fn wakeup_spec_deserializes_from_number_and_string() {
        let n: ScheduleConfig = serde_json::from_str(r#"{ "wakeup": 1500 }"#).unwrap();
        assert_eq!(n.wakeup, WakeupSpec::Millis(1500));
        let s: ScheduleConfig = serde_json::from_str(r#"{ "wakeup": "*/5 * * * *" }"#).unwrap();
        assert_eq!(s.wakeup, WakeupSpec::Text("*/5 * * * *".into()));
    }
}
