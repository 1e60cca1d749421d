//! Sliding window configuration and decision arithmetic.

use std::time::Duration;

use thiserror::Error;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Reasons a window configuration is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window period must be positive")]
    ZeroPeriod,

    #[error("max_rate must be positive")]
    ZeroMaxRate,
}

/// Window configuration: at most `max_rate` events in any trailing `period`.
///
/// Fixed at startup and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    period: Duration,
    max_rate: u64,
}

impl WindowConfig {
    /// Create a window configuration.
    ///
    /// Fails when `period` is zero or `max_rate` is zero.
    pub fn new(period: Duration, max_rate: u64) -> Result<Self, WindowError> {
        if period.is_zero() {
            return Err(WindowError::ZeroPeriod);
        }
        if max_rate == 0 {
            return Err(WindowError::ZeroMaxRate);
        }
        Ok(Self { period, max_rate })
    }

    /// Get the window duration.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Get the maximum number of admitted events per window.
    pub fn max_rate(&self) -> u64 {
        self.max_rate
    }

    /// The window duration in microseconds, saturating at `i64::MAX`.
    pub fn period_micros(&self) -> i64 {
        i64::try_from(self.period.as_micros()).unwrap_or(i64::MAX)
    }

    /// Events with a timestamp below this value fall outside the window ending at `now`.
    pub fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.period_micros())
    }

    /// Decide on a request from the events left in its key's window.
    ///
    /// `events` is the key's full set after the request's own event has been
    /// inserted and older events pruned. An empty set means the store lost
    /// the insert; it is counted as the single just-recorded event.
    pub fn decide(&self, now: i64, events: &[i64]) -> Decision {
        let (count, earliest) = match events.iter().min() {
            Some(&earliest) => (events.len() as u64, earliest),
            None => (1, now),
        };

        let elapsed = now.saturating_sub(earliest);
        let reset_micros = self.period_micros().saturating_sub(elapsed).max(0);

        Decision {
            allowed: count <= self.max_rate,
            count,
            headers: RateLimitHeaders {
                limit: self.max_rate,
                remaining: self.max_rate.saturating_sub(count),
                reset_secs: ceil_secs(reset_micros),
            },
        }
    }
}

fn ceil_secs(micros: i64) -> u64 {
    let secs = micros / MICROS_PER_SEC;
    let rem = micros % MICROS_PER_SEC;
    (if rem > 0 { secs + 1 } else { secs }) as u64
}

/// Rate limit header values reported for one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`
    pub limit: u64,
    /// `X-RateLimit-Remaining`, never below zero
    pub remaining: u64,
    /// `X-RateLimit-Reset`, seconds until the oldest counted event leaves the window
    pub reset_secs: u64,
}

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Events counted in the window, including this request
    pub count: u64,
    /// Values for the `X-RateLimit-*` response headers
    pub headers: RateLimitHeaders,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = MICROS_PER_SEC;

    fn window(secs: u64, max_rate: u64) -> WindowConfig {
        WindowConfig::new(Duration::from_secs(secs), max_rate).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert_eq!(
            WindowConfig::new(Duration::ZERO, 5),
            Err(WindowError::ZeroPeriod)
        );
        assert_eq!(
            WindowConfig::new(Duration::from_secs(1), 0),
            Err(WindowError::ZeroMaxRate)
        );
    }

    #[test]
    fn test_cutoff() {
        let w = window(60, 2);
        assert_eq!(w.cutoff(100 * SEC), 40 * SEC);
        assert_eq!(w.cutoff(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_single_event_admitted() {
        let w = window(60, 2);
        let d = w.decide(10 * SEC, &[10 * SEC]);

        assert!(d.allowed);
        assert_eq!(d.count, 1);
        assert_eq!(d.headers.limit, 2);
        assert_eq!(d.headers.remaining, 1);
        assert_eq!(d.headers.reset_secs, 60);
    }

    #[test]
    fn test_exactly_max_rate_is_admitted() {
        let w = window(60, 2);
        let d = w.decide(10 * SEC, &[0, 10 * SEC]);

        assert!(d.allowed);
        assert_eq!(d.headers.remaining, 0);
        assert_eq!(d.headers.reset_secs, 50);
    }

    #[test]
    fn test_over_max_rate_is_rejected() {
        let w = window(60, 2);
        let d = w.decide(20 * SEC, &[0, 10 * SEC, 20 * SEC]);

        assert!(!d.allowed);
        assert_eq!(d.count, 3);
        // Remaining is floored at zero
        assert_eq!(d.headers.remaining, 0);
        assert_eq!(d.headers.reset_secs, 40);
    }

    #[test]
    fn test_reset_rounds_up() {
        let w = window(60, 5);
        let d = w.decide(10 * SEC + 1, &[0]);

        // 60s - 10.000001s = 49.999999s
        assert_eq!(d.headers.reset_secs, 50);
    }

    #[test]
    fn test_reset_clamped_at_zero() {
        let w = window(1, 5);
        // An event older than the window that survived pruning
        let d = w.decide(5 * SEC, &[0, 5 * SEC]);
        assert_eq!(d.headers.reset_secs, 0);
    }

    #[test]
    fn test_earliest_is_minimum_regardless_of_order() {
        let w = window(60, 5);
        let d = w.decide(30 * SEC, &[30 * SEC, 5 * SEC, 20 * SEC]);
        assert_eq!(d.headers.reset_secs, 35);
    }

    #[test]
    fn test_empty_events_count_as_one() {
        let w = window(60, 1);
        let d = w.decide(7 * SEC, &[]);

        assert!(d.allowed);
        assert_eq!(d.count, 1);
        assert_eq!(d.headers.remaining, 0);
        assert_eq!(d.headers.reset_secs, 60);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(0), 0);
        assert_eq!(ceil_secs(1), 1);
        assert_eq!(ceil_secs(SEC), 1);
        assert_eq!(ceil_secs(SEC + 1), 2);
    }
}
