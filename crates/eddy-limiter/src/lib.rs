//! # Eddy Limiter
//!
//! Adaptive per-domain rate limiting for the ingestion pipeline:
//!
//! - **Sharded token buckets**: a fixed power-of-two shard array keyed by
//!   FNV-hashed domain, each shard its own mutex
//! - **AIMD adaptation**: multiplicative decrease on errors and latency
//!   degradation, additive increase on success
//! - **Circuit breakers**: per-domain Closed/Open/HalfOpen with capped
//!   open-duration doubling and bounded half-open probing
//! - **Eviction**: idle domain state is dropped after a TTL by a background
//!   task
//!
//! `acquire` suspends until a token is available or fails fast with
//! [`AcquireError::CircuitOpen`] while a breaker is open. Dropping the
//! returned future mid-wait never leaks tokens: a token is only consumed at
//! the instant a permit is granted.

pub mod config;
mod domain;
pub mod limiter;

pub use config::RateLimitConfig;
pub use domain::BreakerState;
pub use limiter::{AcquireError, DomainSnapshot, Feedback, LimiterSnapshot, Permit, RateLimiter};
