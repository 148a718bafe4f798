//! Sliding-window rate limiting keyed by an opaque subject string
//! (typically `{subject}:{route}`).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;

/// Outcome of a limit check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Evict entries older than the window, then admit the request if the
    /// count is still under `limit`. Admitted requests are recorded.
    async fn check_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision>;
}

/// Process-local sliding-window log.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limit mutex poisoned");
        let log = windows.entry(key.to_string()).or_default();

        while log
            .front()
            .is_some_and(|&earliest| earliest + window <= now)
        {
            log.pop_front();
        }

        let count = log.len() as u32;
        if count < limit {
            log.push_back(now);
            Ok(RateLimitDecision {
                allowed: true,
                remaining: limit - count - 1,
            })
        } else {
            Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
            })
        }
    }
}

/// Distributed sliding-window log over a Redis sorted set, evaluated by a
/// single Lua script so the evict/count/admit sequence is atomic.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: redis::Script,
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter").finish()
    }
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        let script = redis::Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])
            local limit = tonumber(ARGV[3])
            local member = ARGV[4]

            redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
            local current = redis.call('ZCARD', key)

            if current < limit then
                redis.call('ZADD', key, now, member)
                redis.call('PEXPIRE', key, window)
                return {1, limit - current - 1}
            end
            return {0, 0}
            "#,
        );
        Self { conn, script }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(format!("ratelimit:{key}"))
            .arg(now_ms)
            .arg(window.as_millis() as i64)
            .arg(limit)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitDecision {
            allowed: reply.first().copied().unwrap_or(0) == 1,
            remaining: reply.get(1).copied().unwrap_or(0).max(0) as u32,
        })
    }
}
