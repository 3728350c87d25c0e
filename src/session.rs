//! Session-scoped key-value storage.
//!
//! The identity layer keeps its ephemeral key and mode flag here. Browsers
//! back this with `sessionStorage`; the CLI uses a JSON file so consecutive
//! invocations share one session.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::warn;

use crate::error::{ChanError, Result};

/// Minimal string store scoped to one session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}

/// Process-local store; the session ends with the process.
#[derive(Debug, Default)]
pub struct MemorySession {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a JSON object in a single file.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never observe a half-written session.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries. A missing file is an empty session.
    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let parent_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        serde_json::to_writer_pretty(&tmp, entries)?;
        tmp.persist(&self.path)
            .map_err(|e| ChanError::storage(format!("persisting session: {e}")))?;
        Ok(())
    }
}

impl SessionStore for FileSession {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut entries) => entries.remove(key),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable session file");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // A corrupt file is replaced rather than blocking every later write.
        let mut entries = self.load().unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySession::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v2"));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/session.json");
        let store = FileSession::new(&path);
        assert_eq!(store.get("a"), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        let reopened = FileSession::new(&path);
        assert_eq!(reopened.get("a").as_deref(), Some("1"));
        assert_eq!(reopened.get("b").as_deref(), Some("2"));
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["a"], "1");
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();
        let store = FileSession::new(&path);
        assert_eq!(store.get("a"), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn shared_store_through_arc() {
        let store = Arc::new(MemorySession::new());
        let other = Arc::clone(&store);
        store.set("k", "v").unwrap();
        assert_eq!(other.get("k").as_deref(), Some("v"));
    }
}
