use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{DeleteStatus, StoreError};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Externally supplied key/value service.
///
/// Implementations are treated as eventually consistent: a `get` followed by
/// a `set` is never assumed to be atomic, and a value written by one caller
/// may be overwritten by another at any time.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the bytes stored under `key`, `None` on a miss.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Writes `value` under `key`. `None` means the entry never expires.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()>;

    /// Removes the entry under `key`.
    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus>;

    /// Removes every entry.
    async fn flush(&self) -> StoreResult<()>;

    /// Returns the name of this store, used in log fields.
    fn name(&self) -> &str {
        "store"
    }
}

#[async_trait]
impl Store for &dyn Store {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (*self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        (*self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus> {
        (*self).delete(key).await
    }

    async fn flush(&self) -> StoreResult<()> {
        (*self).flush().await
    }

    fn name(&self) -> &str {
        (*self).name()
    }
}

#[async_trait]
impl Store for Box<dyn Store> {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn flush(&self) -> StoreResult<()> {
        (**self).flush().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl Store for Arc<dyn Store + Send + 'static> {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn flush(&self) -> StoreResult<()> {
        (**self).flush().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
