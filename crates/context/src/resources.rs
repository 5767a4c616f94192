//! Opaque shared resources — one JSON file per resource under `resources/`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aw_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Markdown,
    Json,
    #[default]
    Text,
    Diff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A handle returned on creation: the id plus a textual reference agents
/// can paste into channel messages.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

pub struct ResourceStore {
    dir: PathBuf,
}

impl ResourceStore {
    pub fn open(context_dir: &Path) -> Result<Self> {
        let dir = context_dir.join("resources");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !id.starts_with("res_") || id.contains('/') || id.contains("..") {
            return Err(Error::NotFound(format!("invalid resource id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub fn create(
        &self,
        content: &str,
        created_by: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceRef> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("res_{}", &suffix[..12]);

        let resource = Resource {
            id: id.clone(),
            resource_type,
            content: content.to_owned(),
            created_by: created_by.to_owned(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&resource)?;
        std::fs::write(self.path_for(&id)?, json)?;

        Ok(ResourceRef {
            reference: format!("resource:{id}"),
            id,
        })
    }

    pub fn read(&self, id: &str) -> Result<Resource> {
        let path = self.path_for(id)?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(format!("resource '{id}' not found")))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
