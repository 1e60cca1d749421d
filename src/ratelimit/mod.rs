//! Rate limiting logic: client keys, the sliding window and the cooldown tracker.

mod client;
mod clock;
mod cooldown;
mod limiter;
mod window;

pub use client::ClientKey;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::{CooldownConfig, CooldownTracker};
pub use limiter::{FailurePolicy, SlidingWindowLimiter, Verdict};
pub use window::{Decision, RateLimitHeaders, WindowConfig, WindowError};
