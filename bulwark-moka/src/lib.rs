#![warn(missing_docs)]
//! In-memory [`Store`](bulwark_core::Store) for bulwark backed by Moka.
//!
//! ```
//! use bulwark_moka::MokaStore;
//!
//! let store = MokaStore::builder().max_entries(10_000).build();
//! ```

mod builder;
pub mod metrics;
mod store;

pub use builder::{ByteCapacity, EntryCapacity, MokaStoreBuilder, NoCapacity};
pub use moka::policy::EvictionPolicy;
pub use store::{MokaStore, StoredEntry};
