//! Bounded background execution.
//!
//! [`WorkerPool`] runs a fixed number of long-lived workers over one bounded
//! queue. Intake is backpressured: [`WorkerPool::submit`] waits at most
//! `submit_timeout` for space. A panicking task is logged and counted, and
//! its worker moves on to the next task.
//!
//! For one-off work that does not need a bound, [`spawn_detached`] gives the
//! same panic isolation on a plain runtime task.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::time::Duration;
//! use bulwark::pool::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::builder().name("mailer").workers(4).build());
//! pool.submit(async { /* send one email */ }).await.unwrap();
//! pool.shutdown(Duration::from_secs(5)).await.unwrap();
//! assert_eq!(pool.stats().completed, 1);
//! # }
//! ```

mod manager;
mod policy;

pub use manager::{DetachedHandle, PoolStats, WorkerPool, spawn_detached};
pub use policy::{PoolConfig, PoolConfigBuilder};
