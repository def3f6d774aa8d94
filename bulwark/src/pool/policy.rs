//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Configuration for a [`WorkerPool`](super::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used in spans, logs and metric labels.
    pub name: SmolStr,
    /// Number of long-lived workers. Zero is treated as one.
    pub workers: usize,
    /// Queue capacity as a multiple of `workers`.
    pub queue_multiplier: usize,
    /// How long `submit` waits for queue space.
    #[serde(with = "humantime_serde")]
    pub submit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: SmolStr::new_static("worker-pool"),
            workers: 10,
            queue_multiplier: 2,
            submit_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a new builder for PoolConfig.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Effective queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count()
            .saturating_mul(self.queue_multiplier)
            .max(1)
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the pool name.
    pub fn name(self, name: impl Into<SmolStr>) -> Self {
        Self {
            config: PoolConfig {
                name: name.into(),
                ..self.config
            },
        }
    }

    /// Set the number of workers.
    pub fn workers(self, workers: usize) -> Self {
        Self {
            config: PoolConfig {
                workers,
                ..self.config
            },
        }
    }

    /// Set the queue multiplier.
    pub fn queue_multiplier(self, multiplier: usize) -> Self {
        Self {
            config: PoolConfig {
                queue_multiplier: multiplier,
                ..self.config
            },
        }
    }

    /// Set the submit timeout.
    pub fn submit_timeout(self, timeout: Duration) -> Self {
        Self {
            config: PoolConfig {
                submit_timeout: timeout,
                ..self.config
            },
        }
    }

    /// Build the PoolConfig.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}
