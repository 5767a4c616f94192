//! Per-agent inbox cursors.
//!
//! An inbox message is a channel entry that addresses an agent (via `to` or
//! an `@mention`) with an id past the agent's acknowledgement cursor. Reads
//! are non-destructive; only `ack` moves the cursor, and it only ever moves
//! forward.

use std::path::{Path, PathBuf};

use aw_domain::error::Result;

use crate::channel::{ChannelEntry, ChannelKind};

/// File-backed cursor set, one file per agent under `cursors/`.
pub struct InboxCursors {
    dir: PathBuf,
}

impl InboxCursors {
    pub fn open(context_dir: &Path) -> Result<Self> {
        let dir = context_dir.join("cursors");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, agent: &str) -> PathBuf {
        let safe: String = agent
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(safe)
    }

    /// The last acknowledged id for an agent (0 = nothing acked).
    pub fn last_acked(&self, agent: &str) -> u64 {
        std::fs::read_to_string(self.path_for(agent))
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Advance the cursor. A lower or equal value is a no-op: acked entries
    /// are never resurfaced.
    pub fn ack(&self, agent: &str, until_id: u64) -> Result<u64> {
        let current = self.last_acked(agent);
        if until_id <= current {
            return Ok(current);
        }
        std::fs::write(self.path_for(agent), until_id.to_string())?;
        Ok(until_id)
    }
}

/// Whether an entry addresses the given agent.
pub fn addresses(entry: &ChannelEntry, agent: &str) -> bool {
    if entry.from == agent {
        return false;
    }
    if entry.kind != ChannelKind::Message {
        return false;
    }
    entry.to.as_deref() == Some(agent) || entry.mentions.iter().any(|m| m == agent)
}

/// Filter the channel down to an agent's pending inbox.
pub fn pending<'a>(
    entries: &'a [ChannelEntry],
    agent: &str,
    last_acked: u64,
) -> Vec<&'a ChannelEntry> {
    entries
        .iter()
        .filter(|e| e.id > last_acked && addresses(e, agent))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AppendOptions, ChannelLog};
    use tempfile::TempDir;

    fn dm(log: &ChannelLog, from: &str, to: &str, content: &str) -> ChannelEntry {
        log.append(
            from,
            content,
            AppendOptions { to: Some(to.into()), ..Default::default() },
        )
        .unwrap()
    }

    #[test]
    fn cursor_starts_at_zero_and_advances() {
        let dir = TempDir::new().unwrap();
        let cursors = InboxCursors::open(dir.path()).unwrap();
        assert_eq!(cursors.last_acked("bob"), 0);

        cursors.ack("bob", 7).unwrap();
        assert_eq!(cursors.last_acked("bob"), 7);
    }

    #[test]
    fn ack_never_regresses() {
        let dir = TempDir::new().unwrap();
        let cursors = InboxCursors::open(dir.path()).unwrap();
        cursors.ack("bob", 9).unwrap();
        cursors.ack("bob", 4).unwrap();
        assert_eq!(cursors.last_acked("bob"), 9);
    }

    #[test]
    fn pending_respects_addressing_and_cursor() {
        let dir = TempDir::new().unwrap();
        let log = ChannelLog::open(dir.path()).unwrap();

        dm(&log, "alice", "bob", "one"); // id 1
        log.append("alice", "hi everyone", AppendOptions::default()).unwrap(); // id 2
        dm(&log, "carol", "bob", "two"); // id 3
        log.append("alice", "hey @bob look", AppendOptions::default()).unwrap(); // id 4

        let entries = log.read_all().unwrap();

        let inbox = pending(&entries, "bob", 0);
        let ids: Vec<u64> = inbox.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        // After acking 3, only id 4 is pending.
        let inbox = pending(&entries, "bob", 3);
        let ids: Vec<u64> = inbox.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn own_messages_and_system_entries_never_land_in_inbox() {
        let dir = TempDir::new().unwrap();
        let log = ChannelLog::open(dir.path()).unwrap();

        dm(&log, "bob", "bob", "note to self");
        log.append(
            "daemon",
            "@bob woke up",
            AppendOptions { kind: ChannelKind::System, ..Default::default() },
        )
        .unwrap();

        let entries = log.read_all().unwrap();
        assert!(pending(&entries, "bob", 0).is_empty());
    }
}
