//! On-disk catalog of sessions and the running-daemon record.
//!
//! Layout under the config directory (default `~/.agent-worker/`):
//!
//! ```text
//! daemon.json          live daemon record, removed at shutdown
//! default              id of the default session (optional)
//! sessions/<id>.json   one file per session, written by the owning process
//! sessions/<id>.pid    artifact, unlinked on cleanup
//! sessions/<id>.ready  artifact, polled by wait_for_ready
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aw_domain::error::{Error, Result};
use aw_domain::schedule::ScheduleConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session metadata, one JSON file each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<PathBuf>,
    pub model: String,
    pub system: String,
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,
}

/// The live daemon record (`daemon.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed session/daemon registry. One writer per file (the owning
/// daemon); other processes only read.
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// The default config directory: `~/.agent-worker`.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-worker")
    }

    /// Open (creating directories as needed) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{id}.json"))
    }

    fn daemon_path(&self) -> PathBuf {
        self.root.join("daemon.json")
    }

    fn default_path(&self) -> PathBuf {
        self.root.join("default")
    }

    /// Artifact files that may exist alongside a session record.
    fn artifact_paths(&self, id: &str) -> [PathBuf; 2] {
        [
            self.sessions_dir().join(format!("{id}.pid")),
            self.sessions_dir().join(format!("{id}.ready")),
        ]
    }

    pub fn ready_path(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{id}.ready"))
    }

    // ── Daemon record ──────────────────────────────────────────────

    pub fn write_daemon(&self, record: &DaemonRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.daemon_path(), json)?;
        Ok(())
    }

    pub fn read_daemon(&self) -> Option<DaemonRecord> {
        let raw = std::fs::read_to_string(self.daemon_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Best-effort removal; failures at shutdown are swallowed by callers.
    pub fn remove_daemon(&self) -> Result<()> {
        match std::fs::remove_file(self.daemon_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a daemon record exists and its pid is alive. Stale records
    /// are cleaned up on the way.
    pub fn daemon_is_running(&self) -> bool {
        match self.read_daemon() {
            Some(record) if pid_alive(record.pid) => true,
            Some(_) => {
                tracing::info!("removing stale daemon record");
                let _ = self.remove_daemon();
                false
            }
            None => false,
        }
    }

    // ── Session records ────────────────────────────────────────────

    /// Write the session file; the first registered session becomes the
    /// default.
    pub fn register(&self, info: &SessionInfo) -> Result<()> {
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(self.session_path(&info.id), json)?;
        if !self.default_path().exists() {
            std::fs::write(self.default_path(), &info.id)?;
        }
        Ok(())
    }

    /// Locate a session by exact id, then by name, then by unique id prefix.
    pub fn find(&self, id_or_name: &str) -> Result<Option<SessionInfo>> {
        // Exact id file.
        if let Some(info) = self.read_session_file(&self.session_path(id_or_name)) {
            return Ok(Some(info));
        }

        let all = self.list()?;

        // Name scan.
        if let Some(info) = all
            .iter()
            .find(|s| s.name.as_deref() == Some(id_or_name))
        {
            return Ok(Some(info.clone()));
        }

        // Unique id-prefix match.
        let matches: Vec<&SessionInfo> = all
            .iter()
            .filter(|s| s.id.starts_with(id_or_name))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].clone())),
            n => Err(Error::Conflict(format!(
                "session prefix '{id_or_name}' is ambiguous ({n} matches)"
            ))),
        }
    }

    /// Delete a session record and its artifacts. Repicks (or removes) the
    /// default when the removed session held it. Returns the removed record.
    pub fn unregister(&self, id_or_name: &str) -> Result<Option<SessionInfo>> {
        let Some(info) = self.find(id_or_name)? else {
            return Ok(None);
        };

        std::fs::remove_file(self.session_path(&info.id))?;
        for artifact in self.artifact_paths(&info.id) {
            let _ = std::fs::remove_file(artifact);
        }

        if self.default_session().as_deref() == Some(info.id.as_str()) {
            match self.list()?.first() {
                Some(next) => std::fs::write(self.default_path(), &next.id)?,
                None => {
                    let _ = std::fs::remove_file(self.default_path());
                }
            }
        }

        Ok(Some(info))
    }

    pub fn list(&self) -> Result<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(self.sessions_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(info) = self.read_session_file(&path) {
                sessions.push(info);
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    fn read_session_file(&self, path: &Path) -> Option<SessionInfo> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed session file");
                None
            }
        }
    }

    pub fn default_session(&self) -> Option<String> {
        let raw = std::fs::read_to_string(self.default_path()).ok()?;
        let id = raw.trim().to_string();
        (!id.is_empty()).then_some(id)
    }

    /// Liveness probe: signal 0 to the recorded pid. Dead sessions are
    /// unregistered (record + artifacts) as a side effect.
    pub fn is_running(&self, info: &SessionInfo) -> bool {
        if pid_alive(info.pid) {
            return true;
        }
        tracing::info!(id = %info.id, pid = info.pid, "cleaning up dead session");
        let _ = self.unregister(&info.id);
        false
    }

    /// Poll (50 ms interval) for the session's ready file.
    pub fn wait_for_ready(&self, id_or_name: &str, timeout: Duration) -> Result<SessionInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(info) = self.find(id_or_name)? {
                if self.ready_path(&info.id).exists() {
                    return Ok(info);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "session '{id_or_name}' not ready within {timeout:?}"
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Yield the first free short name: `a0`…`a9`, `b0`…`z9` (260 slots);
    /// fall back to `agent-<6 hex>` when all are taken.
    pub fn generate_auto_name(&self) -> Result<String> {
        let taken: Vec<String> = self
            .list()?
            .into_iter()
            .filter_map(|s| s.name)
            .collect();

        for letter in 'a'..='z' {
            for digit in 0..=9u8 {
                let candidate = format!("{letter}{digit}");
                if !taken.contains(&candidate) {
                    return Ok(candidate);
                }
            }
        }

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Ok(format!("agent-{}", &suffix[..6]))
    }
}

/// Signal-0 probe via `kill(pid, None)`.
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
