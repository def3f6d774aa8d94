//! Error-rate circuit breaker around guarded reads.
//!
//! The breaker counts outcomes of [`DegradationManager::safe_get`] in a window.
//! A check cycle ([`DegradationManager::check`]) opens it when the window holds
//! at least `min_request_count` requests and the error percentage reaches
//! `error_rate_threshold`. While open, reads never reach the fetch function.
//! After `degradation_duration` the next status check closes it again and
//! resets the counters.
//!
//! The window is approximate: counters are reset wholesale once
//! `window_duration` has passed since the window started.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::Store;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::DegradationConfig;
use crate::error::GuardError;
use crate::guard::CacheGuard;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Degraded: reads are served by the fallback or rejected.
    Open,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationStats {
    /// Current state.
    pub state: BreakerState,
    /// Requests recorded in the current window.
    pub total: u64,
    /// Failed requests recorded in the current window.
    pub errors: u64,
    /// `errors / total * 100`, zero for an empty window.
    pub error_rate: f64,
}

#[derive(Debug)]
struct DegradationState {
    total: u64,
    errors: u64,
    window_start: Instant,
    state: BreakerState,
    opened_at: Option<Instant>,
}

impl DegradationState {
    fn new(now: Instant) -> Self {
        Self {
            total: 0,
            errors: 0,
            window_start: now,
            state: BreakerState::Closed,
            opened_at: None,
        }
    }

    fn reset_window(&mut self, now: Instant) {
        self.total = 0;
        self.errors = 0;
        self.window_start = now;
    }

    fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.errors as f64 / self.total as f64 * 100.0
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
    }

    fn close(&mut self, now: Instant) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.reset_window(now);
    }

    /// Closes the breaker if it has been open for `duration`. Returns `true` on recovery.
    fn try_recover(&mut self, now: Instant, duration: Duration) -> bool {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(opened_at)) if now.duration_since(opened_at) >= duration => {
                self.close(now);
                true
            }
            _ => false,
        }
    }
}

/// Circuit breaker wrapping a [`CacheGuard`].
///
/// Construct one per protected dependency and share it with `Arc`.
pub struct DegradationManager<S> {
    guard: Arc<CacheGuard<S>>,
    config: DegradationConfig,
    state: Mutex<DegradationState>,
}

impl<S> std::fmt::Debug for DegradationManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationManager")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl<S> DegradationManager<S>
where
    S: Store,
{
    /// Creates a closed breaker around `guard`.
    pub fn new(guard: Arc<CacheGuard<S>>, config: DegradationConfig) -> Self {
        Self {
            guard,
            config,
            state: Mutex::new(DegradationState::new(Instant::now())),
        }
    }

    /// Returns the wrapped guard.
    pub fn guard(&self) -> &Arc<CacheGuard<S>> {
        &self.guard
    }

    /// Returns the breaker configuration.
    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Reads through the guard unless the breaker is open.
    ///
    /// While open, `fetch` is not called and [`GuardError::Degraded`] is returned.
    pub async fn safe_get<T, E, F, Fut>(
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
        self.execute(key, ttl, fetch, None::<fn() -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Reads through the guard, answering from `fallback` while the breaker is open.
    ///
    /// The fallback's error is reported as [`GuardError::Fetch`].
    pub async fn safe_get_with_fallback<T, E, F, Fut, Fb, FbFut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
        fallback: Fb,
    ) -> Result<T, GuardError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        self.execute(key, ttl, fetch, Some(fallback)).await
    }

    async fn execute<T, E, F, Fut, Fb, FbFut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
        fallback: Option<Fb>,
    ) -> Result<T, GuardError<E>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        if self.is_degraded() {
            #[cfg(feature = "metrics")]
            metrics::counter!(*crate::metrics::DEGRADATION_REJECTED).increment(1);
            debug!(key, "breaker open, skipping fetch");
            return match fallback {
                Some(fallback) => fallback().await.map_err(GuardError::Fetch),
                None => Err(GuardError::Degraded),
            };
        }

        let result = self.guard.get_with_protection(key, ttl, fetch).await;
        match &result {
            Err(error) if error.is_failure() => self.record_error(),
            _ => self.record_success(),
        }
        result
    }

    /// Records a successful request in the current window.
    pub fn record_success(&self) {
        self.state.lock().total += 1;
    }

    /// Records a failed request in the current window.
    pub fn record_error(&self) {
        let mut state = self.state.lock();
        state.total += 1;
        state.errors += 1;
    }

    /// Returns `true` while the breaker is open.
    ///
    /// This is a status check: an open breaker whose degradation period has
    /// elapsed is closed here and its counters reset.
    pub fn is_degraded(&self) -> bool {
        let mut state = self.state.lock();
        if state.try_recover(Instant::now(), self.config.degradation_duration) {
            info!("degradation period elapsed, breaker closed");
        }
        state.state == BreakerState::Open
    }

    /// Runs one check cycle and returns the resulting state.
    ///
    /// Recovers an expired open breaker, opens a closed one whose window
    /// crossed the error threshold, and starts a new window once the current
    /// one has run for `window_duration`.
    pub fn check(&self) -> BreakerState {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.state {
            BreakerState::Open => {
                if state.try_recover(now, self.config.degradation_duration) {
                    info!("degradation period elapsed, breaker closed");
                }
            }
            BreakerState::Closed => {
                let error_rate = state.error_rate();
                if state.total >= self.config.min_request_count
                    && error_rate >= self.config.error_rate_threshold
                {
                    warn!(
                        total = state.total,
                        errors = state.errors,
                        error_rate,
                        threshold = self.config.error_rate_threshold,
                        "error rate over threshold, breaker opened"
                    );
                    state.open(now);
                    #[cfg(feature = "metrics")]
                    metrics::counter!(*crate::metrics::DEGRADATION_OPENED).increment(1);
                }
            }
        }

        if now.duration_since(state.window_start) >= self.config.window_duration {
            state.reset_window(now);
        }
        state.state
    }

    /// Forces the breaker open, independent of the counters.
    pub fn degrade(&self) {
        let mut state = self.state.lock();
        if state.state == BreakerState::Closed {
            warn!("breaker opened manually");
            #[cfg(feature = "metrics")]
            metrics::counter!(*crate::metrics::DEGRADATION_OPENED).increment(1);
        }
        state.open(Instant::now());
    }

    /// Forces the breaker closed and resets the counters.
    pub fn recover(&self) {
        let mut state = self.state.lock();
        if state.state == BreakerState::Open {
            info!("breaker closed manually");
        }
        state.close(Instant::now());
    }

    /// Returns a snapshot of the breaker.
    pub fn stats(&self) -> DegradationStats {
        let state = self.state.lock();
        DegradationStats {
            state: state.state,
            total: state.total,
            errors: state.errors,
            error_rate: state.error_rate(),
        }
    }
}

impl<S> DegradationManager<S>
where
    S: Store + 'static,
{
    /// Runs [`check`](Self::check) every `config.check_interval` on the
    /// current Tokio runtime until the returned handle is stopped or dropped.
    pub fn spawn_monitor(self: &Arc<Self>) -> MonitorHandle {
        let token = CancellationToken::new();
        let manager = Arc::clone(self);
        let cancelled = token.clone();
        let period = self.config.check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.check();
                    }
                }
            }
            debug!("degradation monitor stopped");
        });

        MonitorHandle {
            handle,
            _cancel: token.drop_guard(),
        }
    }
}

/// Handle to a running degradation monitor. Dropping it stops the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    handle: JoinHandle<()>,
    _cancel: DropGuard,
}

impl MonitorHandle {
    /// Stops the monitor and waits for it to exit.
    pub async fn stop(self) {
        let MonitorHandle { handle, _cancel } = self;
        drop(_cancel);
        let _ = handle.await;
    }

    /// Returns `true` once the monitor task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
