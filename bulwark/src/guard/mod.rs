//! Protected reads over an external [`Store`].
//!
//! [`CacheGuard::get_with_protection`] composes three defenses:
//!
//! - **Penetration** — a key the source reports as absent is cached as a null
//!   marker for [`GuardConfig::null_ttl`], so repeated lookups of missing keys
//!   do not reach the source.
//! - **Avalanche** — each TTL written is extended by a random duration in
//!   `[0, random_expire_range)`, so entries written together expire apart.
//! - **Breakdown** — concurrent misses on one key are coalesced and the single
//!   load runs under a per-key lock, so the source sees one fetch per key.

mod envelope;
mod locks;

use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{DeleteStatus, Store, StoreResult};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::concurrency::KeyedCall;
use crate::config::GuardConfig;
use crate::error::{CallError, GuardError};
use crate::panic::catch_panic;

use envelope::Lookup;
use locks::LockRegistry;

type TypedCalls<T, E> = KeyedCall<String, T, GuardError<E>>;

/// Cache-protection guard over a store `S`.
///
/// The guard is an explicitly constructed service: share one instance behind
/// an `Arc` between the callers that should coalesce with each other.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use bulwark::{CacheGuard, GuardConfig, GuardError};
/// use bulwark_moka::MokaStore;
///
/// let guard = CacheGuard::new(
///     MokaStore::builder().max_entries(1_000).build(),
///     GuardConfig::default(),
/// );
///
/// let name: Result<String, GuardError<String>> = guard
///     .get_with_protection("user:1", Duration::from_secs(60), || async {
///         Ok(Some("alice".to_owned()))
///     })
///     .await;
/// assert_eq!(name.unwrap(), "alice");
/// # }
/// ```
pub struct CacheGuard<S> {
    store: S,
    config: GuardConfig,
    locks: LockRegistry,
    // One coalescing map per (value, error) type pair.
    calls: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl<S> std::fmt::Debug for CacheGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGuard")
            .field("config", &self.config)
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl<S> CacheGuard<S>
where
    S: Store,
{
    /// Creates a guard over `store`.
    pub fn new(store: S, config: GuardConfig) -> Self {
        Self {
            locks: LockRegistry::new(config.max_idle_locks),
            store,
            config,
            calls: DashMap::new(),
        }
    }

    /// Returns the guard configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the number of per-key breakdown locks currently retained.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Reads `key`, loading it through `fetch` on a miss.
    ///
    /// `fetch` returns `Ok(None)` when the source has no value for the key.
    /// Errors from `fetch` are returned as [`GuardError::Fetch`] and never
    /// cached. A confirmed-absent key yields [`GuardError::EmptyValue`].
    pub async fn get_with_protection<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, GuardError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.lookup::<T, E>(key).await? {
            Lookup::Hit(value) => {
                #[cfg(feature = "metrics")]
                metrics::counter!(*crate::metrics::GUARD_HIT, "store" => self.store.name().to_string())
                    .increment(1);
                return Ok(value);
            }
            Lookup::Null => {
                #[cfg(feature = "metrics")]
                metrics::counter!(*crate::metrics::GUARD_NULL_HIT, "store" => self.store.name().to_string())
                    .increment(1);
                return Err(GuardError::EmptyValue);
            }
            Lookup::Miss => {
                #[cfg(feature = "metrics")]
                metrics::counter!(*crate::metrics::GUARD_MISS, "store" => self.store.name().to_string())
                    .increment(1);
            }
        }

        if self.config.breakdown {
            let calls = self.calls_for::<T, E>();
            let mut fetch = Some(fetch);
            loop {
                // Waiters drop this future unpolled, so `fetch` is taken at most once.
                let load = async {
                    match fetch.take() {
                        Some(fetch) => self.load(key, ttl, fetch).await,
                        None => Err(GuardError::Abandoned),
                    }
                };
                match calls.call(key.to_owned(), load).await {
                    Err(CallError::Abandoned) => {
                        debug!(key, "coalesced load was cancelled, retrying");
                    }
                    result => return result.map_err(GuardError::from),
                }
            }
        } else {
            match catch_panic(fetch()).await {
                Ok(fetched) => self.fill(key, ttl, fetched).await,
                Err(message) => {
                    warn!(key, panic = %message, "fetch panicked");
                    Err(GuardError::Panicked(message))
                }
            }
        }
    }

    /// Removes `key` from the store, including a cached null marker.
    pub async fn invalidate(&self, key: &str) -> StoreResult<DeleteStatus> {
        self.store.delete(key).await
    }

    /// Removes every entry from the store.
    pub async fn clear(&self) -> StoreResult<()> {
        self.store.flush().await
    }

    /// Returns `ttl` extended by the avalanche jitter, or `ttl` unchanged when
    /// the avalanche guard is off.
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if !self.config.avalanche || self.config.random_expire_range.is_zero() {
            return ttl;
        }
        let range = u64::try_from(self.config.random_expire_range.as_nanos()).unwrap_or(u64::MAX);
        ttl.saturating_add(Duration::from_nanos(rand::rng().random_range(0..range)))
    }

    /// Breakdown path run by the single leader for a key.
    async fn load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let lock = self.locks.lock_for(key);
        let _held = tokio::time::timeout(self.config.lock_timeout, lock.lock())
            .await
            .map_err(|_| {
                warn!(key, timeout = ?self.config.lock_timeout, "breakdown lock timed out");
                GuardError::LockTimeout {
                    key: key.to_owned(),
                    timeout: self.config.lock_timeout,
                }
            })?;

        // A caller outside this coalescing group may have filled the key meanwhile.
        match self.lookup::<T, E>(key).await? {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Null => return Err(GuardError::EmptyValue),
            Lookup::Miss => {}
        }

        let fetched = fetch().await;
        self.fill(key, ttl, fetched).await
    }

    /// Writes a fetch outcome back to the store and converts it for the caller.
    async fn fill<T, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetched: Result<Option<T>, E>,
    ) -> Result<T, GuardError<E>>
    where
        T: Serialize,
    {
        #[cfg(feature = "metrics")]
        metrics::counter!(*crate::metrics::GUARD_FETCH, "store" => self.store.name().to_string())
            .increment(1);

        match fetched.map_err(GuardError::Fetch)? {
            None => {
                if self.config.penetration {
                    let null_ttl = self.config.null_ttl;
                    if let Err(error) = self
                        .store
                        .set(key, envelope::encode_null(), Some(null_ttl))
                        .await
                    {
                        warn!(key, %error, "failed to cache null marker");
                    } else {
                        debug!(key, ?null_ttl, "cached null marker");
                    }
                }
                Err(GuardError::EmptyValue)
            }
            Some(value) => {
                let ttl = self.ttl_with_jitter(ttl);
                let raw = envelope::encode_value(&value).map_err(|error| {
                    warn!(key, %error, "failed to encode fetched value");
                    GuardError::Format(error)
                })?;
                if let Err(error) = self.store.set(key, raw, Some(ttl)).await {
                    warn!(key, %error, "failed to cache fetched value");
                }
                Ok(value)
            }
        }
    }

    async fn lookup<T, E>(&self, key: &str) -> Result<Lookup<T>, GuardError<E>>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(Lookup::Miss);
        };
        match envelope::decode::<T>(&raw) {
            Ok(Lookup::Null) if !self.config.penetration => Ok(Lookup::Miss),
            Ok(lookup) => Ok(lookup),
            Err(error) => {
                // Entries written for another type or format are overwritten by the next fill.
                warn!(key, %error, "undecodable cache entry, treating as miss");
                Ok(Lookup::Miss)
            }
        }
    }

    fn calls_for<T, E>(&self) -> Arc<TypedCalls<T, E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let erased = self
            .calls
            .entry(TypeId::of::<(T, E)>())
            .or_insert_with(|| Arc::new(TypedCalls::<T, E>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        erased
            .downcast::<TypedCalls<T, E>>()
            .unwrap_or_else(|_| Arc::new(TypedCalls::new()))
    }
}
