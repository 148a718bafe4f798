//! Per-event-type lifecycle counters and duration tracking.
//!
//! Counters are best-effort observability, never load-bearing: sink failures
//! are logged and swallowed so metric trouble cannot fail a publish or a
//! worker.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::Serialize;
use tracing::warn;

/// Lifecycle stage an event can be counted against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventStage {
    Published,
    Processed,
    Failed,
    DeadLettered,
}

impl EventStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::DeadLettered => "dlq",
        }
    }
}

/// Sink for lifecycle counters and job-duration samples.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn incr(&self, event_type: &str, stage: EventStage);
    async fn record_duration(&self, event_type: &str, elapsed: Duration);
}

/// Aggregate view over recorded durations for one event type.
#[derive(Clone, Copy, Debug)]
pub struct DurationStats {
    pub count: u64,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

#[derive(Clone, Copy, Debug, Default)]
struct DurationAggregate {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

/// In-memory metrics registry. The default sink for single-process runs and
/// tests; exposes read access for introspection.
#[derive(Debug, Default)]
pub struct LifecycleMetrics {
    counters: DashMap<(String, EventStage), u64>,
    durations: DashMap<String, DurationAggregate>,
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, event_type: &str, stage: EventStage) -> u64 {
        self.counters
            .get(&(event_type.to_string(), stage))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn duration_stats(&self, event_type: &str) -> Option<DurationStats> {
        self.durations.get(event_type).map(|aggregate| DurationStats {
            count: aggregate.count,
            avg: aggregate.total / aggregate.count.max(1) as u32,
            min: aggregate.min,
            max: aggregate.max,
        })
    }
}

#[async_trait]
impl MetricsSink for LifecycleMetrics {
    async fn incr(&self, event_type: &str, stage: EventStage) {
        *self
            .counters
            .entry((event_type.to_string(), stage))
            .or_insert(0) += 1;
    }

    async fn record_duration(&self, event_type: &str, elapsed: Duration) {
        let mut entry = self
            .durations
            .entry(event_type.to_string())
            .or_insert_with(|| DurationAggregate {
                min: elapsed,
                ..Default::default()
            });
        entry.count += 1;
        entry.total += elapsed;
        entry.min = entry.min.min(elapsed);
        entry.max = entry.max.max(elapsed);
    }
}

#[derive(Serialize)]
struct LifecycleSample<'a> {
    event_type: &'a str,
    duration_ms: u128,
}

/// Redis-backed sink: short-TTL counters plus a capped lifecycle log per
/// event type, shared across instances.
#[derive(Clone)]
pub struct RedisMetricsSink {
    conn: ConnectionManager,
    ttl: Duration,
}

impl std::fmt::Debug for RedisMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMetricsSink")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisMetricsSink {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl MetricsSink for RedisMetricsSink {
    async fn incr(&self, event_type: &str, stage: EventStage) {
        let key = format!("metric:events:{}:{}", event_type, stage.as_str());
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<()> = async {
            conn.incr::<_, _, i64>(&key, 1).await?;
            conn.expire::<_, ()>(&key, self.ttl.as_secs() as i64).await
        }
        .await;

        if let Err(err) = result {
            warn!(key = %key, error = %err, "metric increment failed");
        }
    }

    async fn record_duration(&self, event_type: &str, elapsed: Duration) {
        let key = format!("metric:events:{}:lifecycle", event_type);
        let sample = LifecycleSample {
            event_type,
            duration_ms: elapsed.as_millis(),
        };
        let Ok(json) = serde_json::to_string(&sample) else {
            return;
        };
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<()> = async {
            conn.lpush::<_, _, i64>(&key, json).await?;
            // Keep the last 1000 samples
            conn.ltrim::<_, ()>(&key, 0, 999).await?;
            conn.expire::<_, ()>(&key, self.ttl.as_secs() as i64).await
        }
        .await;

        if let Err(err) = result {
            warn!(key = %key, error = %err, "lifecycle sample push failed");
        }
    }
}
