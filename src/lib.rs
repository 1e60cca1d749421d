//! Ratewarden - Sliding-Window Rate Limiting Middleware
//!
//! This crate decides, per client, whether an HTTP request may proceed based
//! on how many requests that client made within a trailing time window. The
//! per-client event timestamps live in a shared event store (Redis in
//! production), so any number of server instances enforce one limit.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
