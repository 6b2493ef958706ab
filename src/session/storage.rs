//! Durable local storage for the event log and the session snapshot.
//!
//! Records are JSON documents addressed by key. Reads are tolerant: a missing,
//! unreadable or corrupt record reads as absent and is logged, never returned
//! as an error. Writes replace the whole record; with two writers the last one
//! wins.

use directories::ProjectDirs;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Key of the persisted event log
pub const EVENT_LOG_KEY: &str = "event_log";
/// Key of the persisted session snapshot
pub const SESSION_KEY: &str = "session";

/// Keyed record store
pub trait LocalStore {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a record, treating anything malformed as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = store.load(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("[STORAGE] Discarding corrupt record '{}': {}", key, e);
            None
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    store.save(key, &json)
}

/// Records stored as `<key>.json` files in one directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    /// Store in the user's data directory, or the working directory when the
    /// platform has none.
    pub fn in_default_dir() -> Self {
        FileStore::new(Self::default_dir())
    }

    pub fn default_dir() -> PathBuf {
        match ProjectDirs::from("org", "chess-session", "chess-session") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => PathBuf::from("."),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl LocalStore for FileStore {
    fn load(&self, key: &str) -> Option<String> {
        let path = self.path(key);
        if !path.exists() {
            info!("[STORAGE] No record at {:?}", path);
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                warn!("[STORAGE] Failed to read {:?}: {}", path, e);
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-process store, used when nothing should touch the disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.records.borrow().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.records.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.records.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert!(store.load("missing").is_none());
        store.save("k", "{\"a\":1}").unwrap();
        assert_eq!(store.load("k").as_deref(), Some("{\"a\":1}"));
        store.remove("k").unwrap();
        assert!(store.load("k").is_none());
        store.remove("k").expect("Removing an absent record is fine");
    }

    #[test]
    fn test_corrupt_record_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save("bad", "{not json").unwrap();
        let value: Option<Vec<u32>> = load_json(&store, "bad");
        assert!(value.is_none());
    }

    #[test]
    fn test_memory_store_json_helpers() {
        let store = MemoryStore::new();
        save_json(&store, "numbers", &vec![1u32, 2, 3]).unwrap();
        let back: Option<Vec<u32>> = load_json(&store, "numbers");
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
