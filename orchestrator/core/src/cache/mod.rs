//! TTL Cache
//!
//! Response rows live in the persistent [`KeyValueStore`] as JSON documents,
//! one per derived key. A row is fresh while its age is below its TTL; expired
//! rows are kept until an explicit purge so they can still be served as a
//! last resort when every backend is failing.
//!
//! Reads never fail: a store error or an undecodable row is logged and
//! reported as a miss.

mod key;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::routing::Priority;
use crate::store::{KeyValueStore, StoreError};

pub use key::{cache_key, CACHE_KEY_PREFIX};

/// One cached response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Derived key (see [`cache_key`])
    pub key: String,
    /// Response data
    pub data: Value,
    /// When the row was written
    pub written_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub ttl_seconds: u64,
    /// Priority taken from the kind's cache rule
    pub priority: Priority,
}

impl CacheEntry {
    /// Age of the row at `now`, in milliseconds
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.written_at).num_milliseconds()
    }

    /// Whether the row is still within its TTL at `now`
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.age_ms(now) < ttl_ms
    }
}

/// Cache over a persistent store
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").finish_non_exhaustive()
    }
}

impl TtlCache {
    /// Create a cache writing through `store`
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read a row
    ///
    /// With `allow_stale == false` only fresh rows are returned. With
    /// `allow_stale == true` the TTL is ignored.
    pub async fn get(&self, key: &str, allow_stale: bool) -> Option<CacheEntry> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Undecodable cache row, treating as miss");
                return None;
            }
        };

        if allow_stale || entry.is_fresh(self.clock.now()) {
            Some(entry)
        } else {
            tracing::trace!(key = %key, "Cache row expired");
            None
        }
    }

    /// Write a row, replacing any existing row under `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be serialized or stored.
    pub async fn put(
        &self,
        key: &str,
        data: Value,
        ttl_seconds: u64,
        priority: Priority,
    ) -> Result<(), StoreError> {
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            written_at: self.clock.now(),
            ttl_seconds,
            priority,
        };
        let row = serde_json::to_string(&entry)?;
        self.store.set(key, row).await?;

        tracing::trace!(key = %key, ttl_seconds, "Cache row written");
        Ok(())
    }

    /// Remove every cache row, leaving other store keys alone
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list or remove keys.
    pub async fn purge_all(&self) -> Result<usize, StoreError> {
        let removed = self.store.remove_prefixed(CACHE_KEY_PREFIX).await?;
        tracing::info!(removed, "Cache purged");
        Ok(removed)
    }
}
