//! HTTP surface: rate limiting middleware and the server that hosts it.

mod layer;
mod server;

pub use layer::{
    client_key, CooldownLayer, CooldownService, RateLimitLayer, RateLimitService,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{router, HttpServer};
