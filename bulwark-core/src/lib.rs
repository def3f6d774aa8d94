#![warn(missing_docs)]
//! # bulwark-core
//!
//! Storage abstraction for the bulwark cache-protection toolkit.
//!
//! The guard in the `bulwark` crate never owns cached data. It talks to an
//! externally supplied key/value service through the [`Store`] trait defined
//! here, which keeps the protection logic independent of where bytes live
//! (an in-process cache such as `bulwark-moka`, Redis, memcached, ...).
//!
//! ## Implementing a store
//!
//! ```
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use bulwark_core::{Bytes, DeleteStatus, Store, StoreResult};
//!
//! struct NullStore;
//!
//! #[async_trait]
//! impl Store for NullStore {
//!     async fn get(&self, _key: &str) -> StoreResult<Option<Bytes>> {
//!         Ok(None)
//!     }
//!
//!     async fn set(&self, _key: &str, _value: Bytes, _ttl: Option<Duration>) -> StoreResult<()> {
//!         Ok(())
//!     }
//!
//!     async fn delete(&self, _key: &str) -> StoreResult<DeleteStatus> {
//!         Ok(DeleteStatus::Missing)
//!     }
//!
//!     async fn flush(&self) -> StoreResult<()> {
//!         Ok(())
//!     }
//! }
//! ```

mod error;
mod store;

pub use bytes::Bytes;
pub use error::StoreError;
pub use store::{Store, StoreResult};

/// Status of deleting result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}
