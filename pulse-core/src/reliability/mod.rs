//! Reliability primitives the bus and the hub lean on: circuit breaking,
//! idempotent-delivery deduplication, sliding-window rate limiting and
//! batched execution.

mod batch;
mod circuit_breaker;
mod dedup;
mod rate_limit;

pub use batch::{BatchExecutor, BatchOutcome};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use dedup::{Deduplicator, MemoryDeduplicator, RedisDeduplicator};
pub use rate_limit::{
    MemoryRateLimiter, RateLimitDecision, RateLimiter, RedisRateLimiter,
};
