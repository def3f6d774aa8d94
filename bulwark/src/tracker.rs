//! In-memory registry of long-lived handles, for spotting leaks.

use std::panic::Location;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use smol_str::SmolStr;
use tokio::time::Instant;
use tracing::warn;

/// A tracked handle.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    /// Identifier given to [`ResourceTracker::track`].
    pub id: String,
    /// Kind of resource, e.g. `"connection"`.
    pub kind: SmolStr,
    /// Wall-clock registration time.
    pub created_at: DateTime<Utc>,
    /// Source location of the `track` call.
    pub location: String,
    /// Time since registration, as of the `check` that returned this entry.
    #[serde(with = "humantime_serde")]
    pub age: Duration,
    #[serde(skip)]
    registered: Instant,
}

/// Best-effort registry of acquired resources.
///
/// Register a handle with [`track`](Self::track) when it is acquired and
/// remove it with [`untrack`](Self::untrack) when it is released. Anything
/// still registered past a threshold is reported by [`check`](Self::check).
/// The tracker observes; it never closes anything.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: DashMap<String, ResourceInfo>,
}

impl ResourceTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`, recording the caller's location.
    ///
    /// Tracking an id that is already registered replaces the old entry.
    #[track_caller]
    pub fn track(&self, id: impl Into<String>, kind: impl Into<SmolStr>) {
        let id = id.into();
        let location = Location::caller().to_string();
        let info = ResourceInfo {
            id: id.clone(),
            kind: kind.into(),
            created_at: Utc::now(),
            location,
            age: Duration::ZERO,
            registered: Instant::now(),
        };
        self.resources.insert(id, info);
    }

    /// Removes `id`. Returns `false` if it was not tracked.
    pub fn untrack(&self, id: &str) -> bool {
        self.resources.remove(id).is_some()
    }

    /// Returns entries older than `threshold`, oldest first.
    pub fn check(&self, threshold: Duration) -> Vec<ResourceInfo> {
        let now = Instant::now();
        let mut stale: Vec<ResourceInfo> = self
            .resources
            .iter()
            .filter_map(|entry| {
                let age = now.duration_since(entry.registered);
                (age > threshold).then(|| ResourceInfo {
                    age,
                    ..entry.value().clone()
                })
            })
            .collect();
        stale.sort_by(|a, b| b.age.cmp(&a.age));
        stale
    }

    /// Logs every entry older than `threshold` and returns how many there were.
    pub fn report(&self, threshold: Duration) -> usize {
        let stale = self.check(threshold);
        for info in &stale {
            warn!(
                id = %info.id,
                kind = %info.kind,
                created_at = %info.created_at,
                location = %info.location,
                age_ms = info.age.as_millis(),
                "possible resource leak"
            );
        }
        stale.len()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
