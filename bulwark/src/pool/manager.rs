//! WorkerPool implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::error::PoolError;
use crate::panic::catch_panic;

use super::policy::PoolConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Queue = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

/// Counters shared with the workers.
///
/// Kept apart from the pool itself so that workers never keep the queue
/// sender alive.
#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time view of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of workers the pool was started with.
    pub workers: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Tasks that finished normally.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
}

#[derive(Debug)]
struct WorkerPoolInner {
    config: PoolConfig,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

/// Fixed-size pool of workers draining one bounded queue.
///
/// Cloning is cheap and every clone submits to the same workers. Dropping
/// the last clone without [`shutdown`](Self::shutdown) closes intake; the
/// workers finish what is queued and exit on their own.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
}

impl WorkerPool {
    /// Starts the workers on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.worker_count();
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity());
        let queue: Queue = Arc::new(AsyncMutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|id| {
                let span = info_span!("pool_worker", pool = %config.name, worker = id);
                tokio::spawn(
                    run_worker(id, config.name.clone(), queue.clone(), counters.clone())
                        .instrument(span),
                )
            })
            .collect();

        debug!(pool = %config.name, workers, capacity = config.queue_capacity(), "worker pool started");

        Self {
            inner: Arc::new(WorkerPoolInner {
                config,
                sender: RwLock::new(Some(sender)),
                workers: Mutex::new(handles),
                counters,
            }),
        }
    }

    /// Starts a pool with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Queues `task`, waiting up to `submit_timeout` for space.
    ///
    /// A full queue is backpressure: the caller decides whether to retry,
    /// drop the work or run it elsewhere.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .read()
            .clone()
            .ok_or(PoolError::ShuttingDown)?;
        let timeout = self.inner.config.submit_timeout;
        let counters = &self.inner.counters;

        // `queued` only counts jobs that hold a queue slot.
        match tokio::time::timeout(timeout, sender.reserve()).await {
            Ok(Ok(permit)) => {
                counters.queued.fetch_add(1, Ordering::SeqCst);
                permit.send(Box::pin(task));
                Ok(())
            }
            Ok(Err(_)) => Err(PoolError::ShuttingDown),
            Err(_) => {
                warn!(pool = %self.inner.config.name, ?timeout, "submit timed out on a full queue");
                Err(PoolError::SubmitTimeout(timeout))
            }
        }
    }

    /// Stops intake and waits up to `timeout` for queued tasks to drain.
    ///
    /// Workers still running when the timeout expires are aborted. Once
    /// shutdown has begun, further calls return `Ok(())` immediately.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PoolError> {
        let Some(sender) = self.inner.sender.write().take() else {
            return Ok(());
        };
        drop(sender);

        let handles = std::mem::take(&mut *self.inner.workers.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let start = Instant::now();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                debug!(
                    pool = %self.inner.config.name,
                    elapsed_ms = start.elapsed().as_millis(),
                    "worker pool stopped"
                );
                Ok(())
            }
            Err(_) => {
                for abort in &aborts {
                    abort.abort();
                }
                warn!(
                    pool = %self.inner.config.name,
                    ?timeout,
                    queued = self.inner.counters.queued.load(Ordering::SeqCst),
                    "worker pool did not drain in time, aborting workers"
                );
                Err(PoolError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.inner.sender.read().is_none()
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            workers: self.inner.config.worker_count(),
            queued: counters.queued.load(Ordering::SeqCst),
            active: counters.active.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            panicked: counters.panicked.load(Ordering::SeqCst),
        }
    }
}

async fn run_worker(id: usize, pool: SmolStr, queue: Queue, counters: Arc<Counters>) {
    loop {
        // The receiver lock is only held while waiting for the next job.
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        let start = Instant::now();
        match catch_panic(job).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                #[cfg(feature = "metrics")]
                metrics::counter!(*crate::metrics::POOL_TASKS_COMPLETED, "pool" => pool.to_string())
                    .increment(1);
            }
            Err(message) => {
                counters.panicked.fetch_add(1, Ordering::SeqCst);
                error!(
                    worker = id,
                    panic = %message,
                    elapsed_ms = start.elapsed().as_millis(),
                    "pool task panicked"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!(*crate::metrics::POOL_TASKS_PANICKED, "pool" => pool.to_string())
                    .increment(1);
            }
        }
        counters.active.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = id, pool = %pool, "worker stopped");
}

/// Handle to a task started by [`spawn_detached`].
#[derive(Debug)]
pub struct DetachedHandle {
    handle: JoinHandle<bool>,
}

impl DetachedHandle {
    /// Check if the task is finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task. Returns `false` if it panicked or was aborted.
    pub async fn join(self) -> bool {
        matches!(self.handle.await, Ok(true))
    }
}

/// Runs `task` on the current runtime outside any pool.
///
/// The task gets the same panic isolation and logging as pool tasks; `kind`
/// names it in the span and logs. Dropping the handle does not cancel it.
pub fn spawn_detached<F>(kind: impl Into<SmolStr>, task: F) -> DetachedHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let kind = kind.into();
    let span = info_span!("detached_task", kind = %kind);
    let handle = tokio::spawn(
        async move {
            let start = Instant::now();
            match catch_panic(task).await {
                Ok(()) => {
                    debug!(elapsed_ms = start.elapsed().as_millis(), "detached task finished");
                    true
                }
                Err(message) => {
                    error!(kind = %kind, panic = %message, "detached task panicked");
                    false
                }
            }
        }
        .instrument(span),
    );
    DetachedHandle { handle }
}
