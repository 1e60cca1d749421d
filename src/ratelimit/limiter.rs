//! Core sliding-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::store::{EventStore, StoreError};

use super::client::ClientKey;
use super::clock::{Clock, SystemClock};
use super::window::{Decision, WindowConfig};

/// Default deadline for the store calls made on behalf of one request.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// What to do with a request when the event store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the failure
    #[default]
    Open,
    /// Refuse the request with 503 Service Unavailable
    Closed,
}

/// The limiter's answer for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The store answered and the window was evaluated.
    Decided(Decision),
    /// The store failed and the request is admitted without headers.
    FailedOpen,
    /// The store failed and the request is refused.
    FailedClosed,
}

/// The sliding-window rate limiter.
///
/// Every request records its own event before the decision is taken, so a
/// rejected request still counts against the client's window. The limiter
/// holds no per-client state of its own; all of it lives in the event store.
pub struct SlidingWindowLimiter {
    store: Arc<dyn EventStore>,
    window: WindowConfig,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    failure_policy: FailurePolicy,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("store", &self.store.name())
            .field("window", &self.window)
            .field("store_timeout", &self.store_timeout)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter over the given store using the system clock.
    pub fn new(store: Arc<dyn EventStore>, window: WindowConfig) -> Self {
        Self {
            store,
            window,
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Replace the clock used to timestamp requests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the deadline shared by the store calls of one request.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set what happens to a request when the store fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Get the window configuration.
    pub fn window(&self) -> WindowConfig {
        self.window
    }

    /// Get the store deadline.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Get the failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Record an event for `key` at `now` and decide on it.
    ///
    /// Inserts the event, prunes events older than `now - period`, reads the
    /// remaining set and evaluates it. The three store calls are not atomic
    /// unless the store makes them so.
    pub async fn admit(
        &self,
        key: &ClientKey,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        let now = now.timestamp_micros();
        let cutoff = self.window.cutoff(now);

        let events = self
            .store
            .record_and_list(key.as_str(), now, cutoff)
            .await?;

        if events.is_empty() {
            warn!(
                key = %key,
                store = self.store.name(),
                "Event store returned no events after insert, counting the request alone"
            );
        }

        Ok(self.window.decide(now, &events))
    }

    /// Check a request for `key` at the current time.
    ///
    /// The store calls share one deadline. Any store failure, including the
    /// deadline expiring, is resolved by the failure policy as a whole; a
    /// decision is never computed from partial data.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn check(&self, key: &ClientKey) -> Verdict {
        let now = self.clock.now();

        let result = match tokio::time::timeout(self.store_timeout, self.admit(key, now)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        };

        match result {
            Ok(decision) => {
                trace!(
                    count = decision.count,
                    limit = decision.headers.limit,
                    remaining = decision.headers.remaining,
                    reset = decision.headers.reset_secs,
                    "Checked rate limit"
                );
                if !decision.allowed {
                    debug!(
                        count = decision.count,
                        limit = decision.headers.limit,
                        "Rate limit exceeded"
                    );
                }
                Verdict::Decided(decision)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    store = self.store.name(),
                    policy = ?self.failure_policy,
                    "Event store failed during rate limit check"
                );
                match self.failure_policy {
                    FailurePolicy::Open => Verdict::FailedOpen,
                    FailurePolicy::Closed => Verdict::FailedClosed,
                }
            }
        }
    }
}
