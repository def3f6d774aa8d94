#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bulwark
//!
//! Protection for services that sit in front of a key/value cache and a slow
//! or fragile data source.
//!
//! Read path: [`DegradationManager`] short-circuits reads while the source is
//! failing, [`CacheGuard`] applies penetration, avalanche and breakdown
//! protection on top of a [`Store`](bulwark_core::Store), and [`KeyedCall`]
//! makes sure one fetch per key is in flight at a time.
//!
//! Background path: [`WorkerPool`] runs submitted tasks on a fixed number of
//! workers behind a bounded queue, isolating panics per task.
//!
//! Resource path: [`ScopeGuard`] and [`TransactionGuard`] turn "always
//! release" into a drop-time guarantee, and [`ResourceTracker`] reports
//! handles that were never released.
//!
//! Every component is an explicitly constructed value. Share it with `Arc`
//! (or clone it, for the pool); nothing here is a process-wide singleton.

/// Single-flight coalescing of concurrent calls by key.
///
/// [`KeyedCall`](concurrency::KeyedCall) lets exactly one caller per key run
/// its future while concurrent callers for the same key wait for and share
/// that result.
pub mod concurrency;

/// Configuration types for the guard and the degradation breaker.
pub mod config;

/// Error-rate based degradation (circuit breaker) around the guard.
pub mod degradation;

/// Error types.
pub mod error;

/// Cache penetration, avalanche and breakdown protection.
pub mod guard;

/// Metrics names, available with the `metrics` feature.
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

/// Bounded worker pool and detached task spawning.
pub mod pool;

/// Exactly-once cleanup guards for cancellable scopes and units of work.
pub mod scope;

/// Leak diagnostics for long-lived handles.
pub mod tracker;

mod panic;

pub use concurrency::KeyedCall;
pub use config::{DegradationConfig, DegradationConfigBuilder, GuardConfig, GuardConfigBuilder};
pub use degradation::{BreakerState, DegradationManager, DegradationStats, MonitorHandle};
pub use error::{CallError, GuardError, PoolError};
pub use guard::CacheGuard;
pub use pool::{PoolConfig, PoolStats, WorkerPool, spawn_detached};
pub use scope::{ScopeGuard, TransactionGuard, TransactionState};
pub use tracker::{ResourceInfo, ResourceTracker};

pub use bulwark_core::{Bytes, DeleteStatus, Store, StoreError, StoreResult};
