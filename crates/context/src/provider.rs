//! The shared-context provider for one `(workflow, tag)` pair.
//!
//! Owns the context directory: channel log, inbox cursors, team documents,
//! resources, and the proposal manager.

use std::path::{Path, PathBuf};

use aw_domain::error::Result;

use crate::channel::{AppendOptions, ChannelEntry, ChannelLog, ReadFilter};
use crate::documents::DocumentStore;
use crate::inbox::{pending, InboxCursors};
use crate::proposals::ProposalManager;
use crate::resources::{Resource, ResourceRef, ResourceStore, ResourceType};

pub struct ContextProvider {
    dir: PathBuf,
    channel: ChannelLog,
    cursors: InboxCursors,
    documents: DocumentStore,
    resources: ResourceStore,
    proposals: ProposalManager,
}

impl ContextProvider {
    /// Open (creating as needed) the context rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            channel: ChannelLog::open(&dir)?,
            cursors: InboxCursors::open(&dir)?,
            documents: DocumentStore::open(&dir)?,
            resources: ResourceStore::open(&dir)?,
            proposals: ProposalManager::new(),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Channel ────────────────────────────────────────────────────

    pub fn append_channel(
        &self,
        from: &str,
        content: &str,
        opts: AppendOptions,
    ) -> Result<ChannelEntry> {
        self.channel.append(from, content, opts)
    }

    pub fn read_channel(&self, filter: &ReadFilter) -> Result<Vec<ChannelEntry>> {
        self.channel.read(filter)
    }

    // ── Inbox ──────────────────────────────────────────────────────

    /// Pending (unacked) entries addressed to an agent. Non-destructive.
    pub fn inbox(&self, agent: &str) -> Result<Vec<ChannelEntry>> {
        let entries = self.channel.read_all()?;
        let cursor = self.cursors.last_acked(agent);
        Ok(pending(&entries, agent, cursor)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Advance the agent's cursor; never regresses.
    pub fn ack_inbox(&self, agent: &str, until_id: u64) -> Result<u64> {
        self.cursors.ack(agent, until_id)
    }

    // ── Documents ──────────────────────────────────────────────────

    pub fn read_document(&self, file: Option<&str>) -> Result<String> {
        self.documents.read(file)
    }

    pub fn write_document(&self, content: &str, file: Option<&str>) -> Result<()> {
        self.documents.write(content, file)
    }

    pub fn append_document(&self, content: &str, file: Option<&str>) -> Result<()> {
        self.documents.append(content, file)
    }

    pub fn create_document(&self, file: &str, content: &str) -> Result<()> {
        self.documents.create(file, content)
    }

    pub fn list_documents(&self) -> Result<Vec<String>> {
        self.documents.list()
    }

    // ── Resources ──────────────────────────────────────────────────

    pub fn create_resource(
        &self,
        content: &str,
        created_by: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceRef> {
        self.resources.create(content, created_by, resource_type)
    }

    pub fn read_resource(&self, id: &str) -> Result<Resource> {
        self.resources.read(id)
    }

    // ── Proposals ──────────────────────────────────────────────────

    pub fn proposals(&self) -> &ProposalManager {
        &self.proposals
    }
}
