//! Configuration for the cache guard and the degradation breaker.
//!
//! Both types deserialize from any serde format with human-readable durations
//! (`"60s"`, `"5m"`, `"250ms"`). Loading them from files or the environment is
//! left to the application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of a [`CacheGuard`](crate::guard::CacheGuard).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bulwark::GuardConfig;
///
/// let config = GuardConfig::builder()
///     .null_ttl(Duration::from_secs(30))
///     .random_expire_range(Duration::from_secs(120))
///     .breakdown(false)
///     .build();
/// assert!(config.penetration);
/// assert!(!config.breakdown);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Cache a null marker for keys the source reports as absent.
    pub penetration: bool,
    /// Add a random extra duration to every TTL written.
    pub avalanche: bool,
    /// Allow only one fetch per key at a time.
    pub breakdown: bool,
    /// TTL of the null marker (e.g. "60s").
    #[serde(with = "humantime_serde")]
    pub null_ttl: Duration,
    /// Upper bound (exclusive) of the random TTL extension.
    #[serde(with = "humantime_serde")]
    pub random_expire_range: Duration,
    /// How long to wait for the per-key breakdown lock.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    /// Number of per-key locks retained before idle ones are pruned.
    pub max_idle_locks: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            penetration: true,
            avalanche: true,
            breakdown: true,
            null_ttl: Duration::from_secs(60),
            random_expire_range: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(3),
            max_idle_locks: 10_000,
        }
    }
}

impl GuardConfig {
    /// Create a new builder for `GuardConfig`.
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder::default()
    }
}

/// Builder for [`GuardConfig`]. Starts from the defaults.
#[derive(Debug, Clone, Default)]
pub struct GuardConfigBuilder {
    config: GuardConfig,
}

impl GuardConfigBuilder {
    /// Enable or disable the penetration guard.
    pub fn penetration(mut self, enabled: bool) -> Self {
        self.config.penetration = enabled;
        self
    }

    /// Enable or disable the avalanche guard.
    pub fn avalanche(mut self, enabled: bool) -> Self {
        self.config.avalanche = enabled;
        self
    }

    /// Enable or disable the breakdown guard.
    pub fn breakdown(mut self, enabled: bool) -> Self {
        self.config.breakdown = enabled;
        self
    }

    /// Set the null marker TTL.
    pub fn null_ttl(mut self, ttl: Duration) -> Self {
        self.config.null_ttl = ttl;
        self
    }

    /// Set the TTL jitter range.
    pub fn random_expire_range(mut self, range: Duration) -> Self {
        self.config.random_expire_range = range;
        self
    }

    /// Set the per-key lock acquisition timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set how many per-key locks are retained before idle ones are pruned.
    pub fn max_idle_locks(mut self, max: usize) -> Self {
        self.config.max_idle_locks = max;
        self
    }

    /// Build the `GuardConfig`.
    pub fn build(self) -> GuardConfig {
        self.config
    }
}

/// Configuration of a [`DegradationManager`](crate::degradation::DegradationManager).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DegradationConfig {
    /// Error percentage (0-100) at or above which the breaker opens.
    pub error_rate_threshold: f64,
    /// Minimum requests in the window before the error rate is evaluated.
    pub min_request_count: u64,
    /// Length of the counting window.
    #[serde(with = "humantime_serde")]
    pub window_duration: Duration,
    /// How long the breaker stays open before recovering on its own.
    #[serde(with = "humantime_serde")]
    pub degradation_duration: Duration,
    /// Period of the background check started by `spawn_monitor`.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 50.0,
            min_request_count: 20,
            window_duration: Duration::from_secs(60),
            degradation_duration: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
        }
    }
}

impl DegradationConfig {
    /// Create a new builder for `DegradationConfig`.
    pub fn builder() -> DegradationConfigBuilder {
        DegradationConfigBuilder::default()
    }
}

/// Builder for [`DegradationConfig`]. Starts from the defaults.
#[derive(Debug, Clone, Default)]
pub struct DegradationConfigBuilder {
    config: DegradationConfig,
}

impl DegradationConfigBuilder {
    /// Set the error percentage that opens the breaker. Clamped to `0..=100`.
    pub fn error_rate_threshold(mut self, percent: f64) -> Self {
        self.config.error_rate_threshold = percent.clamp(0.0, 100.0);
        self
    }

    /// Set the minimum request count for evaluation.
    pub fn min_request_count(mut self, count: u64) -> Self {
        self.config.min_request_count = count;
        self
    }

    /// Set the counting window.
    pub fn window_duration(mut self, window: Duration) -> Self {
        self.config.window_duration = window;
        self
    }

    /// Set how long the breaker stays open.
    pub fn degradation_duration(mut self, duration: Duration) -> Self {
        self.config.degradation_duration = duration;
        self
    }

    /// Set the monitor check interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Build the `DegradationConfig`.
    pub fn build(self) -> DegradationConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_config_from_json() {
        let config: GuardConfig = serde_json::from_str(
            r#"{"null_ttl": "30s", "random_expire_range": "5m", "avalanche": false}"#,
        )
        .unwrap();

        assert_eq!(config.null_ttl, Duration::from_secs(30));
        assert_eq!(config.random_expire_range, Duration::from_secs(300));
        assert!(!config.avalanche);
        assert!(config.breakdown);
        assert_eq!(config.lock_timeout, GuardConfig::default().lock_timeout);
    }

    #[test]
    fn test_degradation_config_from_json() {
        let config: DegradationConfig = serde_json::from_str(
            r#"{"error_rate_threshold": 25.0, "degradation_duration": "1m 30s"}"#,
        )
        .unwrap();

        assert_eq!(config.error_rate_threshold, 25.0);
        assert_eq!(config.degradation_duration, Duration::from_secs(90));
        assert_eq!(config.min_request_count, 20);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let config = DegradationConfig::builder()
            .error_rate_threshold(250.0)
            .build();
        assert_eq!(config.error_rate_threshold, 100.0);
    }
}
