//! Team documents — shared files at the context directory root.

use std::path::{Path, PathBuf};

use aw_domain::error::{Error, Result};

/// The document used when no file name is given.
pub const DEFAULT_DOCUMENT: &str = "team.md";

pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn open(context_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(context_dir)?;
        Ok(Self {
            root: context_dir.to_path_buf(),
        })
    }

    /// Resolve a document name, rejecting anything that would escape the
    /// context directory.
    fn path_for(&self, file: Option<&str>) -> Result<PathBuf> {
        let name = file.unwrap_or(DEFAULT_DOCUMENT);
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(Error::Other(format!("invalid document name '{name}'")));
        }
        Ok(self.root.join(name))
    }

    pub fn read(&self, file: Option<&str>) -> Result<String> {
        let path = self.path_for(file)?;
        if !path.exists() {
            return Ok(String::new());
        }
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn write(&self, content: &str, file: Option<&str>) -> Result<()> {
        std::fs::write(self.path_for(file)?, content)?;
        Ok(())
    }

    pub fn append(&self, content: &str, file: Option<&str>) -> Result<()> {
        use std::io::Write;
        let mut handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(file)?)?;
        handle.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Create a new document; errors if it already exists.
    pub fn create(&self, file: &str, content: &str) -> Result<()> {
        let path = self.path_for(Some(file))?;
        if path.exists() {
            return Err(Error::Conflict(format!("document '{file}' already exists")));
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Document names at the root, sorted. Internal files (channel log,
    /// cursors, resources) are not documents.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "channel.jsonl" {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn default_document_read_write_append() {
        let (_dir, store) = store();
        assert_eq!(store.read(None).unwrap(), "");

        store.write("# Plan\n", None).unwrap();
        store.append("- step one\n", None).unwrap();
        assert_eq!(store.read(None).unwrap(), "# Plan\n- step one\n");
    }

    #[test]
    fn create_rejects_existing() {
        let (_dir, store) = store();
        store.create("notes.md", "hello").unwrap();
        assert!(matches!(
            store.create("notes.md", "again"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn list_excludes_channel_log() {
        let (dir, store) = store();
        store.write("x", Some("a.md")).unwrap();
        store.write("y", Some("b.md")).unwrap();
        std::fs::write(dir.path().join("channel.jsonl"), "{}").unwrap();

        assert_eq!(store.list().unwrap(), vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[test]
    fn path_traversal_is_rejected() {
        let (_dir, store) = store();
        assert!(store.read(Some("../outside")).is_err());
        assert!(store.write("x", Some("a/b.md")).is_err());
    }
}
