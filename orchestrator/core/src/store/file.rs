//! JSON file store
//!
//! Keeps the whole key space in memory and rewrites one JSON document on every
//! mutation. Writes go to a temporary sibling file first and are renamed into
//! place, so a crash mid-write leaves the previous document intact.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KeyValueStore, StoreError};

/// Default store location
///
/// Returns `$XDG_DATA_HOME/edge-orchestrator/store.json` (typically
/// `~/.local/share/edge-orchestrator/store.json`).
#[must_use]
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("edge-orchestrator").join("store.json"))
}

/// File-backed store holding a single JSON object of string values
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    /// Serializes mutations so each one starts from the last committed rows
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, loading existing rows if the file exists
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(
            path = %path.display(),
            rows = entries.len(),
            "Opened file store"
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the rows and install it once it is on disk
    ///
    /// `mutate` reports whether it changed anything; unchanged copies are
    /// dropped without a rewrite. Readers keep seeing the previous rows until
    /// the new document has been written.
    async fn commit<R>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>) -> (R, bool),
    ) -> Result<R, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.entries.lock().clone();
        let (result, changed) = mutate(&mut next);
        if changed {
            self.write_document(&next).await?;
            *self.entries.lock() = next;
        }
        Ok(result)
    }

    async fn write_document(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let document = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, document)
            .await
            .map_err(|source| StoreError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.commit(|entries| {
            entries.insert(key.to_string(), value);
            ((), true)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.commit(|entries| ((), entries.remove(key).is_some())).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn remove_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        self.commit(|entries| {
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            let removed = before - entries.len();
            (removed, removed > 0)
        })
        .await
    }
}
