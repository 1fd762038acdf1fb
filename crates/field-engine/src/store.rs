// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Durable key/value stores backing the cache mirror.
//!
//! The cache writes every entry through to one of these stores so a later
//! session can pick up still-fresh data. Nothing here is authoritative:
//! callers swallow every [`StoreError`] after logging it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised by a durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("store record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// String key/value interface mirroring the browser-style local storage API.
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every stored value for which `keep` returns `false`.
    ///
    /// Returns how many values were removed.
    fn retain_items(&self, keep: &mut dyn FnMut(&str) -> bool) -> Result<usize, StoreError>;
}

/// One file per key under a cache directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Platform cache directory for field data.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("wxgrid")
            .join("fields")
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Keys contain ':' and '.', so hash them into safe file names
    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.dir.join(format!("{hash}.json"))
    }
}

impl DurableStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn retain_items(&self, keep: &mut dyn FnMut(&str) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                // Removed concurrently by another cache
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !keep(&contents) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }
}

/// Process-local store, used in tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.remove(key);
        Ok(())
    }

    fn retain_items(&self, keep: &mut dyn FnMut(&str) -> bool) -> Result<usize, StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let before = items.len();
        items.retain(|_, value| keep(value));
        Ok(before - items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("wxgrid-store-{}", uuid::Uuid::new_v4()));
        FileStore::open(dir).unwrap()
    }

    #[test]
    fn test_file_store_round_trip() {
        let store = temp_store();
        assert_eq!(store.get_item("temperature:35.00:-97.00:now").unwrap(), None);

        store.set_item("temperature:35.00:-97.00:now", "[1,2,3]").unwrap();
        assert_eq!(
            store.get_item("temperature:35.00:-97.00:now").unwrap().as_deref(),
            Some("[1,2,3]")
        );

        store.remove_item("temperature:35.00:-97.00:now").unwrap();
        assert_eq!(store.get_item("temperature:35.00:-97.00:now").unwrap(), None);

        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let store = temp_store();
        assert!(store.remove_item("never-written").is_ok());
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_file_store_retain_items() {
        let store = temp_store();
        store.set_item("old", "drop").unwrap();
        store.set_item("new", "keep").unwrap();
        fs::write(store.dir().join("notes.txt"), "drop").unwrap();

        let removed = store.retain_items(&mut |value| value == "keep").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_item("old").unwrap(), None);
        assert_eq!(store.get_item("new").unwrap().as_deref(), Some("keep"));
        assert!(store.dir().join("notes.txt").exists());

        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.set_item("a", "1").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
        store.remove_item("a").unwrap();
        assert!(store.is_empty());

        store.set_item("b", "2").unwrap();
        store.set_item("c", "3").unwrap();
        assert_eq!(store.retain_items(&mut |value| value != "2").unwrap(), 1);
        assert_eq!(store.get_item("c").unwrap().as_deref(), Some("3"));
    }
}
