//! Append-only shared channel.
//!
//! One `channel.jsonl` per context directory; every entry is a single JSON
//! line. Ids are monotonic within the directory: the writer scans the log
//! once at open to recover the last id, then serializes appends behind a
//! mutex so ids stay strictly increasing and each line lands whole.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use aw_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Message,
    Log,
    System,
}

/// One line of the channel log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub id: u64,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub kind: ChannelKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Extract `@name` mentions from message content.
pub fn extract_mentions(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_-]+)").unwrap());
    let mut mentions: Vec<String> = re
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    mentions.dedup();
    mentions
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Append options / read filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Private DM: only this agent (and admin reads) see the entry.
    pub to: Option<String>,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// Only entries with `id > since`.
    pub since: Option<u64>,
    /// At most this many entries, keeping the most recent.
    pub limit: Option<usize>,
    /// Agent-scoped read: hides foreign DMs and log/system entries.
    /// `None` is an admin read and sees everything.
    pub agent: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The append-only channel log of one context directory.
pub struct ChannelLog {
    path: PathBuf,
    /// Guards appends; holds the next id to assign.
    next_id: Mutex<u64>,
}

impl ChannelLog {
    /// Open the log, scanning any existing file to recover the id counter.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("channel.jsonl");
        let last_id = if path.exists() {
            read_entries(&path)?.last().map(|e| e.id).unwrap_or(0)
        } else {
            0
        };
        Ok(Self {
            path,
            next_id: Mutex::new(last_id + 1),
        })
    }

    /// Append one entry; assigns the next id and writes a whole line.
    pub fn append(
        &self,
        from: &str,
        content: &str,
        opts: AppendOptions,
    ) -> Result<ChannelEntry> {
        let mut next_id = self.next_id.lock();

        let entry = ChannelEntry {
            id: *next_id,
            from: from.to_owned(),
            to: opts.to,
            kind: opts.kind,
            content: content.to_owned(),
            mentions: extract_mentions(content),
            timestamp: Utc::now(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        *next_id += 1;
        Ok(entry)
    }

    /// Read entries, newest last, applying the filter.
    pub fn read(&self, filter: &ReadFilter) -> Result<Vec<ChannelEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<ChannelEntry> = read_entries(&self.path)?
            .into_iter()
            .filter(|e| filter.since.map_or(true, |since| e.id > since))
            .filter(|e| visible_to(e, filter.agent.as_deref()))
            .collect();

        if let Some(limit) = filter.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Unfiltered read; used by inbox computation.
    pub fn read_all(&self) -> Result<Vec<ChannelEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_entries(&self.path)
    }
}

/// Visibility rule: admin reads (no agent) see everything; agent-scoped
/// reads drop DMs addressed to someone else and all log/system entries.
fn visible_to(entry: &ChannelEntry, agent: Option<&str>) -> bool {
    let Some(agent) = agent else {
        return true;
    };
    if let Some(to) = &entry.to {
        if to != agent && entry.from != agent {
            return false;
        }
    }
    entry.kind == ChannelKind::Message
}

fn read_entries(path: &Path) -> Result<Vec<ChannelEntry>> {
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChannelEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed channel line");
            }
        }
    }
    Ok(entries)
}
