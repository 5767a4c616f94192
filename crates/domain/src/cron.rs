//! 5-field cron engine: `minute hour day-of-month month day-of-week`.
//!
//! Each field supports `*`, exact values, `a-b` ranges, comma lists, `*/s`
//! steps, and `a-b/s` stepped ranges. Evaluation is at minute granularity on
//! the **local wall clock** — schedules follow the host's timezone, matching
//! what an operator writing `30 10 * * *` expects of a single-host daemon.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, Timelike};

use crate::error::{Error, Result};

/// Inclusive value ranges for the five fields, in field order.
const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

/// How far `next_cron_time` scans before giving up: one year of minutes.
const MAX_SCAN_MINUTES: i64 = 366 * 24 * 60;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsed expression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed cron expression: one sorted value set per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    fields: [Vec<u32>; 5],
}

impl CronExpr {
    /// Whether the given local instant matches, at minute granularity.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.fields[0].binary_search(&dt.minute()).is_ok()
            && self.fields[1].binary_search(&dt.hour()).is_ok()
            && self.fields[2].binary_search(&dt.day()).is_ok()
            && self.fields[3].binary_search(&dt.month()).is_ok()
            && self.fields[4]
                .binary_search(&dt.weekday().num_days_from_sunday())
                .is_ok()
    }
}

/// Parse a 5-field cron expression into per-field value sets.
pub fn parse_cron(expr: &str) -> Result<CronExpr> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(Error::BadSchedule(format!(
            "expected 5 fields (minute hour dom month dow), got {}",
            parts.len()
        )));
    }

    let mut fields: [Vec<u32>; 5] = Default::default();
    for (i, part) in parts.iter().enumerate() {
        let (min, max) = FIELD_RANGES[i];
        fields[i] = parse_field(part, FIELD_NAMES[i], min, max)?;
    }
    Ok(CronExpr { fields })
}

/// Parse one field into a sorted, deduplicated value set.
fn parse_field(field: &str, name: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let mut values = Vec::new();

    for part in field.split(',') {
        // Split off an optional `/step` suffix.
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| {
                    Error::BadSchedule(format!("{name}: invalid step '{s}'"))
                })?;
                if step == 0 {
                    return Err(Error::BadSchedule(format!("{name}: step must be positive")));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = parse_value(a, name, min, max)?;
            let end = parse_value(b, name, min, max)?;
            if start > end {
                return Err(Error::BadSchedule(format!(
                    "{name}: range start {start} > end {end}"
                )));
            }
            (start, end)
        } else {
            let v = parse_value(range_part, name, min, max)?;
            (v, v)
        };

        let mut v = start;
        while v <= end {
            values.push(v);
            v += step;
        }
    }

    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_value(token: &str, name: &str, min: u32, max: u32) -> Result<u32> {
    let v: u32 = token
        .parse()
        .map_err(|_| Error::BadSchedule(format!("{name}: invalid value '{token}'")))?;
    if v < min || v > max {
        return Err(Error::BadSchedule(format!(
            "{name}: value {v} out of range {min}..={max}"
        )));
    }
    Ok(v)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Next-fire computation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compute the first instant strictly after `from` that matches `expr`.
///
/// Advances to the next whole minute boundary, then scans minute-by-minute
/// for up to 366 days. Errors when no match exists within that window
/// (e.g. `0 0 31 2 *`).
pub fn next_cron_time(expr: &str, from: NaiveDateTime) -> Result<NaiveDateTime> {
    let cron = parse_cron(expr)?;

    // Next whole minute after `from`.
    let mut candidate = from + Duration::seconds(60 - i64::from(from.second()));
    candidate = candidate
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(candidate);

    for _ in 0..MAX_SCAN_MINUTES {
        if cron.matches(&candidate) {
            return Ok(candidate);
        }
        candidate += Duration::minutes(1);
    }

    Err(Error::BadSchedule(format!(
        "cron '{expr}' has no occurrence within a year of {from}"
    )))
}

/// Milliseconds from `from` until the next occurrence of `expr`, evaluated
/// on the local wall clock.
pub fn ms_until_next_cron(expr: &str, from: DateTime<Local>) -> Result<u64> {
    let local = from.naive_local();
    let next = next_cron_time(expr, local)?;
    let delta = next.signed_duration_since(local);
    Ok(delta.num_milliseconds().max(0) as u64)
}
