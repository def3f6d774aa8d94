//! Moka store implementation.

use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::{Bytes, DeleteStatus, Store, StoreResult};
use moka::future::Cache;
use smol_str::SmolStr;
use tracing::trace;

/// Value held by the Moka cache: the payload plus the TTL it was written with.
///
/// The TTL travels with the entry so the expiry policy can honour per-write
/// TTLs, which is what makes jittered expirations possible.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub(crate) data: Bytes,
    pub(crate) ttl: Option<Duration>,
}

impl StoredEntry {
    /// Returns the stored payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the TTL the entry was written with.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// In-memory store powered by Moka.
///
/// Reads are lock-free; writes use Moka's fine-grained locking. Each entry
/// expires after the TTL passed to [`Store::set`].
///
/// # Caveats
///
/// - Data is **not persisted** and **not shared** across processes.
/// - Expiration is best-effort; an expired entry is never returned by `get`,
///   but it may occupy capacity until Moka's maintenance runs.
#[derive(Clone)]
pub struct MokaStore {
    pub(crate) cache: Cache<String, StoredEntry>,
    pub(crate) label: SmolStr,
}

impl std::fmt::Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl MokaStore {
    /// Creates a new builder for `MokaStore`.
    pub fn builder() -> crate::builder::MokaStoreBuilder<crate::builder::NoCapacity> {
        crate::builder::MokaStoreBuilder::new()
    }

    /// Returns a reference to the underlying Moka cache.
    pub fn cache(&self) -> &Cache<String, StoredEntry> {
        &self.cache
    }

    /// Returns the TTL an entry was written with, if the entry is present.
    pub async fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.cache.get(key).await.and_then(|entry| entry.ttl)
    }
}

#[async_trait]
impl Store for MokaStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        Ok(self.cache.get(key).await.map(|entry| entry.data))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        trace!(store = %self.label, key, ?ttl, "moka set");
        self.cache
            .insert(key.to_owned(), StoredEntry { data: value, ttl })
            .await;
        crate::metrics::record_capacity(
            &self.label,
            self.cache.entry_count(),
            self.cache.weighted_size(),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus> {
        match self.cache.remove(key).await {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    async fn flush(&self) -> StoreResult<()> {
        self.cache.invalidate_all();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }
}
