//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulwark::{Bytes, DeleteStatus, Store, StoreError, StoreResult};
use dashmap::DashMap;
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// In-memory store that records every write.
///
/// Entries never expire; the TTL passed to each `set` is kept for assertions.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: Arc<RecordingInner>,
}

#[derive(Default)]
struct RecordingInner {
    entries: DashMap<String, Bytes>,
    writes: Mutex<Vec<(String, Option<Duration>)>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTLs of all writes to `key`, in order.
    pub fn ttls_for(&self, key: &str) -> Vec<Option<Duration>> {
        self.inner
            .writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, ttl)| *ttl)
            .collect()
    }

    /// TTLs of all writes.
    pub fn all_ttls(&self) -> Vec<Option<Duration>> {
        self.inner
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, ttl)| *ttl)
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.lock().unwrap().len()
    }

    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.inner.entries.get(key).map(|e| e.value().clone())
    }

    pub fn put_raw(&self, key: &str, value: &'static [u8]) {
        self.inner
            .entries
            .insert(key.to_owned(), Bytes::from_static(value));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::connection(std::io::Error::other("store unreachable")));
        }
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner
            .writes
            .lock()
            .unwrap()
            .push((key.to_owned(), ttl));
        self.inner.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<DeleteStatus> {
        Ok(match self.inner.entries.remove(key) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    async fn flush(&self) -> StoreResult<()> {
        self.inner.entries.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Captured log event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

struct EventCaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: Subscriber> Layer<S> for EventCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with("bulwark") {
            return;
        }
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Collects events emitted by the library while its dispatch is the default.
#[derive(Clone)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    dispatch: Dispatch,
}

impl EventCollector {
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(EventCaptureLayer {
            events: events.clone(),
        });
        Self {
            events,
            dispatch: Dispatch::new(subscriber),
        }
    }

    /// Runs `f` with this collector as the default subscriber.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }
}
