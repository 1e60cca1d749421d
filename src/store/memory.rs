//! In-process event store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{EventStore, StoreError};
use crate::ratelimit::WindowConfig;

/// Event store held in process memory.
///
/// Each key owns its own ordered set inside a sharded map, so operations on
/// different keys do not contend. A key whose set is pruned to nothing is
/// removed. Keys that are never touched again are reclaimed by
/// [`MemoryEventStore::sweep_before`], which [`start_sweep_task`] runs on an
/// interval.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: DashMap<String, BTreeSet<i64>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding events.
    pub fn key_count(&self) -> usize {
        self.events.len()
    }

    /// Number of events currently held for a key.
    pub fn event_count(&self, key: &str) -> usize {
        self.events.get(key).map(|set| set.len()).unwrap_or(0)
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.events.clear();
    }

    /// Prune every key to events at or after `cutoff` and drop keys left empty.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_before(&self, cutoff: i64) -> usize {
        let before = self.events.len();
        self.events.retain(|_, set| {
            *set = set.split_off(&cutoff);
            !set.is_empty()
        });
        before.saturating_sub(self.events.len())
    }
}

/// Start a background task that sweeps idle keys out of the store.
///
/// Each tick removes every event older than one window, measured from the
/// wall clock, so a key idle for longer than the period disappears.
pub fn start_sweep_task(
    store: Arc<MemoryEventStore>,
    window: WindowConfig,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        loop {
            interval_timer.tick().await;
            let cutoff = window.cutoff(Utc::now().timestamp_micros());
            let removed = store.sweep_before(cutoff);
            debug!(removed, remaining = store.key_count(), "Swept idle rate limit keys");
        }
    })
}

#[async_trait]
impl EventStore for MemoryEventStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn add_event(&self, key: &str, timestamp: i64) -> Result<(), StoreError> {
        self.events
            .entry(key.to_string())
            .or_default()
            .insert(timestamp);
        Ok(())
    }

    async fn remove_events_before(&self, key: &str, cutoff: i64) -> Result<(), StoreError> {
        let emptied = match self.events.get_mut(key) {
            Some(mut set) => {
                // split_off keeps [cutoff, ..] in the returned half
                let kept = set.split_off(&cutoff);
                let removed = set.len();
                *set = kept;
                trace!(key = %key, cutoff, removed, "Pruned events");
                set.is_empty()
            }
            None => false,
        };

        // The shard guard is released above; re-check under the removal lock
        if emptied {
            self.events.remove_if(key, |_, set| set.is_empty());
        }
        Ok(())
    }

    async fn list_events(&self, key: &str) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .events
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}
