//! Pluggable persistence of per-agent conversation state.
//!
//! Saved after every successful turn and on agent deletion; loaded when an
//! agent name is recreated within the same daemon generation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use aw_domain::error::Result;
use aw_domain::message::SessionState;

/// Persistence of [`SessionState`], keyed by agent name.
pub trait StateStore: Send + Sync {
    fn load(&self, agent: &str) -> Result<Option<SessionState>>;
    fn save(&self, agent: &str, state: &SessionState) -> Result<()>;
    fn delete(&self, agent: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store (default)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The default store: a name → state map, alive for one daemon generation.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, SessionState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, agent: &str) -> Result<Option<SessionState>> {
        Ok(self.states.read().get(agent).cloned())
    }

    fn save(&self, agent: &str, state: &SessionState) -> Result<()> {
        self.states.write().insert(agent.to_owned(), state.clone());
        Ok(())
    }

    fn delete(&self, agent: &str) -> Result<()> {
        self.states.write().remove(agent);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON file per agent under a state directory. Lets conversation
/// state survive daemon restarts.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, agent: &str) -> PathBuf {
        // Agent names are daemon-validated, but never trust them as paths.
        let safe: String = agent
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, agent: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(agent);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, agent: &str, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.path_for(agent), json)?;
        Ok(())
    }

    fn delete(&self, agent: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(agent)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
