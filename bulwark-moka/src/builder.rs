//! Builder for configuring [`MokaStore`].

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;
use smol_str::SmolStr;

use crate::store::{MokaStore, StoredEntry};

/// Approximate per-entry overhead for keys, TTL metadata and Moka bookkeeping.
const ENTRY_OVERHEAD: usize = 96;

/// Expiration policy reading the TTL recorded on each [`StoredEntry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Expiration;

impl Expiry<String, StoredEntry> for Expiration {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // The new value's TTL wins. Moka's default would keep the old deadline,
        // so a null marker overwritten by a real value would expire too early.
        value.ttl
    }
}

/// Marker type: capacity has not been configured yet.
///
/// Call [`max_entries()`](MokaStoreBuilder::max_entries) or
/// [`max_bytes()`](MokaStoreBuilder::max_bytes) before `build()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapacity;

/// Marker type: entry-count capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct EntryCapacity(pub(crate) u64);

/// Marker type: byte-based capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct ByteCapacity(pub(crate) u64);

/// Builder for creating and configuring a [`MokaStore`].
///
/// Capacity is required and set through exactly one of
/// [`max_entries`](Self::max_entries) or [`max_bytes`](Self::max_bytes);
/// `build()` only exists once one of them has been called.
///
/// ```
/// use bulwark_moka::{EvictionPolicy, MokaStore};
///
/// let store = MokaStore::builder()
///     .label("sessions")
///     .max_bytes(50_000_000)
///     .eviction_policy(EvictionPolicy::lru())
///     .build();
/// ```
pub struct MokaStoreBuilder<Cap> {
    capacity: Cap,
    label: SmolStr,
    eviction_policy: Option<EvictionPolicy>,
}

impl MokaStoreBuilder<NoCapacity> {
    /// Creates a new builder with no capacity configured.
    pub fn new() -> Self {
        Self {
            capacity: NoCapacity,
            label: SmolStr::new_static("moka"),
            eviction_policy: None,
        }
    }

    /// Sets the maximum number of entries the store can hold.
    pub fn max_entries(self, capacity: u64) -> MokaStoreBuilder<EntryCapacity> {
        MokaStoreBuilder {
            capacity: EntryCapacity(capacity),
            label: self.label,
            eviction_policy: self.eviction_policy,
        }
    }

    /// Sets the approximate memory budget in bytes (key + payload + overhead).
    pub fn max_bytes(self, bytes: u64) -> MokaStoreBuilder<ByteCapacity> {
        MokaStoreBuilder {
            capacity: ByteCapacity(bytes),
            label: self.label,
            eviction_policy: self.eviction_policy,
        }
    }
}

impl Default for MokaStoreBuilder<NoCapacity> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cap> MokaStoreBuilder<Cap> {
    /// Sets the label reported by [`Store::name`](bulwark_core::Store::name).
    ///
    /// Defaults to `"moka"`.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the eviction policy.
    ///
    /// Defaults to TinyLFU for entry capacity and LRU for byte capacity.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }
}

impl MokaStoreBuilder<EntryCapacity> {
    /// Builds the [`MokaStore`] with entry-count based capacity.
    pub fn build(self) -> MokaStore {
        let policy = self
            .eviction_policy
            .unwrap_or_else(EvictionPolicy::tiny_lfu);
        let cache: Cache<String, StoredEntry> = CacheBuilder::new(self.capacity.0)
            .eviction_policy(policy)
            .expire_after(Expiration)
            .build();

        MokaStore {
            cache,
            label: self.label,
        }
    }
}

impl MokaStoreBuilder<ByteCapacity> {
    /// Builds the [`MokaStore`] with byte-based capacity.
    ///
    /// Defaults to LRU: TinyLFU admission can reject new weighted entries even
    /// when eviction could make room.
    pub fn build(self) -> MokaStore {
        let policy = self.eviction_policy.unwrap_or_else(EvictionPolicy::lru);
        let cache: Cache<String, StoredEntry> = CacheBuilder::new(self.capacity.0)
            .weigher(byte_weigher)
            .eviction_policy(policy)
            .expire_after(Expiration)
            .build();

        MokaStore {
            cache,
            label: self.label,
        }
    }
}

fn byte_weigher(key: &String, value: &StoredEntry) -> u32 {
    (key.len() + value.data.len() + ENTRY_OVERHEAD).min(u32::MAX as usize) as u32
}
