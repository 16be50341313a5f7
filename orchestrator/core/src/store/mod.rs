//! Persistent Key-Value Store
//!
//! The orchestrator persists cache rows and its routing configuration through
//! a small string key-value interface. Two implementations ship with the
//! crate:
//!
//! - [`MemoryStore`]: process-local, used in tests and for ephemeral runs
//! - [`FileStore`]: a single JSON document on disk, rewritten on each change
//!
//! Keys are namespaced by prefix (`cache:`, `config:`) so that unrelated rows
//! can share one store.

mod file;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::{default_store_path, FileStore};
pub use memory::MemoryStore;

/// Errors raised by a [`KeyValueStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("store I/O failed at {path}: {source}")]
    Io {
        /// File the store was operating on
        path: std::path::PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A row or the store document could not be (de)serialized
    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Asynchronous string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys currently stored
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn remove_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        let doomed: Vec<String> = self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();

        for key in &doomed {
            self.remove(key).await?;
        }

        Ok(doomed.len())
    }
}
