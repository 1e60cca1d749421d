//! In-process cooldown tracking.
//!
//! A lighter alternative to the sliding window: each client's last-seen time
//! is kept in a bounded map owned by the middleware, and a client that comes
//! back sooner than `min_interval` is slowed down by a fixed `penalty`
//! instead of being refused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::client::ClientKey;
use super::clock::{Clock, SystemClock};

/// Cooldown settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Requests closer together than this are penalised
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Delay applied to a penalised request
    #[serde(default = "default_penalty_ms")]
    pub penalty_ms: u64,

    /// Maximum number of clients tracked at once
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            penalty_ms: default_penalty_ms(),
            capacity: default_capacity(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_penalty_ms() -> u64 {
    2000
}

fn default_capacity() -> usize {
    10000
}

impl CooldownConfig {
    /// Get the minimum spacing between requests.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Get the delay applied to a penalised request.
    pub fn penalty(&self) -> Duration {
        Duration::from_millis(self.penalty_ms)
    }
}

/// Bounded map of client keys to the time they were last seen.
pub struct CooldownTracker {
    config: CooldownConfig,
    last_seen: Mutex<HashMap<ClientKey, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CooldownTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownTracker")
            .field("config", &self.config)
            .field("tracked", &self.len())
            .finish()
    }
}

impl CooldownTracker {
    /// Create a new tracker using the system clock.
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            last_seen: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to stamp sightings.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the cooldown settings.
    pub fn config(&self) -> CooldownConfig {
        self.config
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    /// Whether no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a sighting of `key` and return the delay it has earned, if any.
    pub fn observe(&self, key: &ClientKey) -> Option<Duration> {
        let now = self.clock.now();
        let min_interval = chrono::Duration::from_std(self.config.min_interval())
            .unwrap_or(chrono::Duration::MAX);

        let mut last_seen = self.last_seen.lock();

        if !last_seen.contains_key(key) && last_seen.len() >= self.config.capacity {
            Self::make_room(&mut last_seen, now, min_interval, self.config.capacity);
        }

        let previous = last_seen.insert(key.clone(), now);
        let too_soon =
            previous.is_some_and(|seen| now.signed_duration_since(seen) < min_interval);

        if too_soon {
            debug!(
                key = %key,
                penalty_ms = self.config.penalty_ms,
                "Client inside cooldown"
            );
            Some(self.config.penalty())
        } else {
            trace!(key = %key, "Client outside cooldown");
            None
        }
    }

    /// Drop entries that can no longer earn a penalty, then the least recently
    /// seen ones until there is space for one more.
    fn make_room(
        last_seen: &mut HashMap<ClientKey, DateTime<Utc>>,
        now: DateTime<Utc>,
        min_interval: chrono::Duration,
        capacity: usize,
    ) {
        last_seen.retain(|_, seen| now.signed_duration_since(*seen) < min_interval);

        while last_seen.len() >= capacity {
            let oldest = last_seen
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    last_seen.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    fn create_tracker(
        min_interval_ms: u64,
        capacity: usize,
    ) -> (CooldownTracker, Arc<ManualClock>) {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let config = CooldownConfig {
            min_interval_ms,
            penalty_ms: 250,
            capacity,
        };
        let tracker = CooldownTracker::new(config).with_clock(clock.clone());
        (tracker, clock)
    }

    #[test]
    fn test_first_sighting_is_free() {
        let (tracker, _) = create_tracker(1000, 10);
        assert_eq!(tracker.observe(&ClientKey::new("a")), None);
    }

    #[test]
    fn test_quick_return_is_penalised() {
        let (tracker, clock) = create_tracker(1000, 10);
        let key = ClientKey::new("a");

        tracker.observe(&key);
        clock.advance(Duration::from_millis(400));
        assert_eq!(tracker.observe(&key), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_slow_return_is_free() {
        let (tracker, clock) = create_tracker(1000, 10);
        let key = ClientKey::new("a");

        tracker.observe(&key);
        clock.advance(Duration::from_millis(1000));
        assert_eq!(tracker.observe(&key), None);
    }

    #[test]
    fn test_each_sighting_refreshes_last_seen() {
        let (tracker, clock) = create_tracker(1000, 10);
        let key = ClientKey::new("a");

        tracker.observe(&key);
        clock.advance(Duration::from_millis(900));
        assert!(tracker.observe(&key).is_some());
        clock.advance(Duration::from_millis(900));
        assert!(tracker.observe(&key).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let (tracker, _) = create_tracker(1000, 10);

        tracker.observe(&ClientKey::new("a"));
        assert_eq!(tracker.observe(&ClientKey::new("b")), None);
    }

    #[test]
    fn test_capacity_drops_stale_entries_first() {
        let (tracker, clock) = create_tracker(1000, 2);

        tracker.observe(&ClientKey::new("stale"));
        clock.advance(Duration::from_secs(5));
        tracker.observe(&ClientKey::new("fresh"));
        tracker.observe(&ClientKey::new("new"));

        assert_eq!(tracker.len(), 2);
        // "fresh" was kept and still earns a penalty
        assert!(tracker.observe(&ClientKey::new("fresh")).is_some());
    }

    #[test]
    fn test_capacity_evicts_least_recently_seen() {
        let (tracker, clock) = create_tracker(60_000, 2);

        tracker.observe(&ClientKey::new("a"));
        clock.advance(Duration::from_millis(10));
        tracker.observe(&ClientKey::new("b"));
        clock.advance(Duration::from_millis(10));
        tracker.observe(&ClientKey::new("c"));

        assert_eq!(tracker.len(), 2);
        // "a" was evicted, so it looks new again
        assert_eq!(tracker.observe(&ClientKey::new("a")), None);
    }

    #[test]
    fn test_config_defaults() {
        let config: CooldownConfig = serde_yaml::from_str("penalty_ms: 10").unwrap();
        assert_eq!(config.min_interval(), Duration::from_secs(1));
        assert_eq!(config.penalty(), Duration::from_millis(10));
        assert_eq!(config.capacity, 10000);
    }
}
