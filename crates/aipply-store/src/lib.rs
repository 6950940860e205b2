//! Durable string-keyed storage behind the AIpply repositories.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "aipply-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("writing store document {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("write rejected for key {0}")]
    WriteRejected(String),
}

/// Synchronous string-keyed store with write-through semantics: `set` is
/// durable before it returns. No transactional isolation is provided;
/// concurrent read-modify-write callers are last-write-wins.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Single-file JSON document mapping keys to string values. Every `set`
/// rewrites the document through a temp file + atomic rename.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    cells: Mutex<BTreeMap<String, String>>,
}

impl FileKvStore {
    /// Loads the document at `path`, creating parent directories as needed.
    /// A corrupt document is logged and replaced by an empty map on the
    /// next write rather than surfaced to callers.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }

        let cells = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading store document {}", path.display()))?;
            match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), %err, "store document unparsable; starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            cells: Mutex::new(cells),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, cells: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(cells).expect("string map always serializes");
        let temp_path = self
            .path
            .with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, raw).map_err(|source| StoreError::Write {
            path: temp_path.display().to_string(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            StoreError::Write {
                path: self.path.display().to_string(),
                source,
            }
        })
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cells = self.cells.lock().expect("store mutex not poisoned");
        Ok(cells.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut cells = self.cells.lock().expect("store mutex not poisoned");
        let previous = cells.insert(key.to_string(), value.to_string());
        if let Err(err) = self.flush(&cells) {
            // Roll the in-memory cell back so memory and disk stay in step.
            match previous {
                Some(old) => {
                    cells.insert(key.to_string(), old);
                }
                None => {
                    cells.remove(key);
                }
            }
            return Err(err);
        }
        Ok(())
    }
}

/// In-memory store for tests. `fail_writes_on` makes `set` reject a chosen
/// key so callers can exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    cells: Mutex<BTreeMap<String, String>>,
    rejected_keys: Mutex<HashSet<String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_on(&self, key: &str) {
        self.rejected_keys
            .lock()
            .expect("store mutex not poisoned")
            .insert(key.to_string());
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cells = self.cells.lock().expect("store mutex not poisoned");
        Ok(cells.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self
            .rejected_keys
            .lock()
            .expect("store mutex not poisoned")
            .contains(key)
        {
            return Err(StoreError::WriteRejected(key.to_string()));
        }
        self.cells
            .lock()
            .expect("store mutex not poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_round_trips_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("aipply.json");

        let store = FileKvStore::open(&path).expect("open");
        assert_eq!(store.get("opportunities").unwrap(), None);
        store.set("opportunities", "[]").expect("set");
        store
            .set("applications_a@x.com", r#"[{"id":"app-1"}]"#)
            .expect("set");

        let reopened = FileKvStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("opportunities").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            reopened.get("applications_a@x.com").unwrap().as_deref(),
            Some(r#"[{"id":"app-1"}]"#)
        );
    }

    #[test]
    fn set_is_write_through() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("aipply.json");
        let store = FileKvStore::open(&path).expect("open");

        store.set("users", "[]").expect("set");

        // Visible on disk before any further call.
        let raw = std::fs::read_to_string(&path).expect("document exists");
        let doc: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(doc["users"], "[]");
    }

    #[test]
    fn corrupt_document_degrades_to_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("aipply.json");
        std::fs::write(&path, "{not json").expect("seed corrupt file");

        let store = FileKvStore::open(&path).expect("open survives corruption");
        assert_eq!(store.get("opportunities").unwrap(), None);
        store.set("opportunities", "[]").expect("set");
        assert_eq!(store.get("opportunities").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn memory_store_rejects_configured_keys() {
        let store = MemoryKvStore::new();
        store.set("users", "[]").expect("set");
        store.fail_writes_on("user_opportunities_b@x.com");

        let err = store
            .set("user_opportunities_b@x.com", "[]")
            .expect_err("write rejected");
        assert!(matches!(err, StoreError::WriteRejected(_)));
        assert_eq!(store.get("users").unwrap().as_deref(), Some("[]"));
    }
}
