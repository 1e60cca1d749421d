//! Event store capability shared by every limiter instance.
//!
//! A store keeps, per client key, a score-ordered set of event timestamps
//! (microseconds since the Unix epoch). The timestamp is both the score and
//! the member, so two events recorded in the same microsecond for the same
//! key fold into one entry.

mod memory;
mod redis;

pub use self::memory::{start_sweep_task, MemoryEventStore};
pub use self::redis::{RedisEventStore, RedisStoreConfig};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by event store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Event store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Event store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for event store implementations.
///
/// The limiter only ever talks to the store through this trait, so the
/// backing service can be swapped (in-memory for tests, Redis for shared
/// deployments) without touching the window algorithm.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Insert an event timestamp into the key's set.
    async fn add_event(&self, key: &str, timestamp: i64) -> Result<(), StoreError>;

    /// Delete every event for the key whose timestamp is strictly below `cutoff`.
    async fn remove_events_before(&self, key: &str, cutoff: i64) -> Result<(), StoreError>;

    /// Return the key's remaining events in ascending order.
    async fn list_events(&self, key: &str) -> Result<Vec<i64>, StoreError>;

    /// Insert, prune and read in that order.
    ///
    /// The default composition issues three independent calls. Concurrent
    /// requests for the same key may interleave between them and each observe
    /// a count lower than the final total. Backends that can do better may
    /// override this with an atomic composition.
    async fn record_and_list(
        &self,
        key: &str,
        timestamp: i64,
        cutoff: i64,
    ) -> Result<Vec<i64>, StoreError> {
        self.add_event(key, timestamp).await?;
        self.remove_events_before(key, cutoff).await?;
        self.list_events(key).await
    }
}
