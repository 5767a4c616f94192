//! Session registry and state persistence for the agent-worker daemon.

pub mod registry;
pub mod state;

pub use registry::{DaemonRecord, Registry, SessionInfo};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
