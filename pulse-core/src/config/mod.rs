//! Static configuration for the circulatory layer.
//!
//! Everything here is composed once at process start (defaults, then an
//! optional TOML file, then environment overrides) and treated as read-only
//! afterwards. Queue descriptors, routing maps and retry constants are plain
//! lookup tables, not runtime state.

mod loader;

pub use loader::ConfigLoader;

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::error::{PulseError, Result};

/// One logical queue: sizing, retry budget and execution deadline.
#[derive(Clone, Debug)]
pub struct QueueDescriptor {
    pub name: String,
    pub default_priority: u8,
    pub max_attempts: u32,
    /// Worker pool size for this queue. CPU/GPU-bound queues run narrow,
    /// I/O-bound queues run wide.
    pub concurrency: usize,
    /// Hard deadline for a single handler invocation.
    pub timeout: Duration,
}

impl QueueDescriptor {
    fn new(
        name: &str,
        default_priority: u8,
        max_attempts: u32,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            default_priority,
            max_attempts,
            concurrency,
            timeout,
        }
    }
}

/// Capped exponential backoff shared by all queues.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// `min(base * multiplier^attempts_made, max_delay)`. Deterministic;
    /// monotonically non-decreasing in `attempts_made`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let scaled = (self.base_delay_ms as f64)
            * (self.multiplier as f64).powi(attempts_made.min(64) as i32);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 3_600_000,
        }
    }
}

/// Dead-letter queue settings.
#[derive(Clone, Debug)]
pub struct DlqConfig {
    pub name: String,
    /// Retry budget applied to queues that do not declare their own.
    pub max_retries: u32,
    /// How long dead-letter records are retained before expiry.
    pub ttl: Duration,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            name: "dlq".to_string(),
            max_retries: 3,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Lease/heartbeat tuning for worker tasks.
#[derive(Clone, Copy, Debug)]
pub struct LeaseConfig {
    /// How long a worker owns a dequeued job before the housekeeper may
    /// reclaim it.
    pub lock_duration_ms: u64,
    /// Renewal cadence while a handler is still running.
    pub lock_renew_ms: u64,
    /// Housekeeping cadence for scanning expired leases.
    pub housekeeper_interval_ms: u64,
}

impl LeaseConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn lock_renew(&self) -> Duration {
        Duration::from_millis(self.lock_renew_ms)
    }

    pub fn housekeeper_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeper_interval_ms)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: 30_000,
            lock_renew_ms: 15_000,
            housekeeper_interval_ms: 1_000,
        }
    }
}

/// Well-known pub/sub channel names and name builders for per-user dynamic
/// channels.
#[derive(Clone, Debug)]
pub struct ChannelNames {
    pub user_online: String,
    pub user_offline: String,
    /// Pattern covering all typing-indicator channels (`typing:{from}:{to}`).
    pub typing_pattern: String,
    pub feed_prefix: String,
    pub notifications_prefix: String,
    pub system_health: String,
}

impl ChannelNames {
    pub fn feed(&self, user_id: &str) -> String {
        format!("{}:{}", self.feed_prefix, user_id)
    }

    pub fn notifications(&self, user_id: &str) -> String {
        format!("{}:{}", self.notifications_prefix, user_id)
    }

    pub fn typing(&self, user_id: &str, recipient_id: &str) -> String {
        format!("typing:{}:{}", user_id, recipient_id)
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            user_online: "user:online".to_string(),
            user_offline: "user:offline".to_string(),
            typing_pattern: "typing:*:*".to_string(),
            feed_prefix: "feed".to_string(),
            notifications_prefix: "notifications".to_string(),
            system_health: "system:health".to_string(),
        }
    }
}

/// Connection settings for the shared Redis transport.
#[derive(Clone, Debug)]
pub struct RedisSettings {
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// The full configuration surface: queue tables, routing maps, retry policy,
/// lease tuning, channel names and transport settings.
#[derive(Clone, Debug)]
pub struct BusConfig {
    pub queues: HashMap<String, QueueDescriptor>,
    /// Event type -> queue name. Unmapped types fall back to `default`.
    pub event_queues: HashMap<String, String>,
    /// Event type -> priority. Unmapped types fall back to priority 5.
    pub event_priorities: HashMap<String, u8>,
    pub retry: RetryPolicy,
    pub dlq: DlqConfig,
    pub lease: LeaseConfig,
    pub channels: ChannelNames,
    pub redis: RedisSettings,
    /// TTL for presence records (safety net for ungraceful disconnects).
    pub presence_ttl: Duration,
    /// TTL for per-event-type metric counters.
    pub metrics_ttl: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        let secs = Duration::from_secs;

        let descriptors = [
            // Critical services
            QueueDescriptor::new("payments", 10, 5, 10, secs(60)),
            QueueDescriptor::new("notifications", 8, 3, 20, secs(60)),
            QueueDescriptor::new("emails", 7, 3, 5, secs(60)),
            // Video processing (long-running)
            QueueDescriptor::new("videoTranscode", 5, 2, 2, secs(3_600)),
            QueueDescriptor::new("thumbnailGeneration", 5, 2, 5, secs(600)),
            QueueDescriptor::new("videoAnalytics", 3, 2, 5, secs(300)),
            // Feed generation
            QueueDescriptor::new("feedFanOut", 9, 2, 5, secs(120)),
            QueueDescriptor::new("feedRefresh", 4, 1, 5, secs(60)),
            // Analytics & tracking
            QueueDescriptor::new("eventTracking", 2, 1, 50, secs(30)),
            QueueDescriptor::new("analyticsAggregation", 2, 2, 5, secs(60)),
            // ML & recommendations
            QueueDescriptor::new("vectorEmbedding", 3, 2, 1, secs(600)),
            QueueDescriptor::new("vectorUpdate", 2, 1, 5, secs(30)),
            // Moderation & admin
            QueueDescriptor::new("contentModeration", 8, 2, 3, secs(120)),
            QueueDescriptor::new("adminActions", 9, 3, 5, secs(60)),
            // Fallback for unmapped event types
            QueueDescriptor::new("default", 5, 3, 5, secs(60)),
        ];
        let queues = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        let event_queues = [
            ("user.created", "notifications"),
            ("user.verified", "notifications"),
            ("user.followed", "feedFanOut"),
            ("post.created", "feedFanOut"),
            ("video.uploaded", "videoTranscode"),
            ("video.transcode.completed", "videoAnalytics"),
            ("like.added", "eventTracking"),
            ("comment.added", "notifications"),
            ("payment.completed", "payments"),
            ("notification.created", "notifications"),
            ("content.flagged", "contentModeration"),
            ("video.viewed", "eventTracking"),
            ("message.sent", "notifications"),
            ("admin.action", "adminActions"),
        ]
        .into_iter()
        .map(|(event, queue)| (event.to_string(), queue.to_string()))
        .collect();

        let event_priorities = [
            ("payment.completed", 10),
            ("payment.failed", 10),
            ("admin.action", 9),
            ("notification.created", 8),
            ("post.created", 9),
            ("feed.fan-out", 9),
            ("user.followed", 8),
            ("comment.added", 7),
            ("like.added", 5),
            ("video.viewed", 2),
            ("message.sent", 7),
        ]
        .into_iter()
        .map(|(event, priority)| (event.to_string(), priority))
        .collect();

        Self {
            queues,
            event_queues,
            event_priorities,
            retry: RetryPolicy::default(),
            dlq: DlqConfig::default(),
            lease: LeaseConfig::default(),
            channels: ChannelNames::default(),
            redis: RedisSettings::default(),
            presence_ttl: secs(3_600),
            metrics_ttl: secs(86_400),
        }
    }
}

impl BusConfig {
    /// Sanity-check the composed configuration.
    ///
    /// Event types routed to a queue with no descriptor are logged and left
    /// in place; publishing such an event surfaces `QueueNotConfigured` to
    /// the caller at runtime. Structural problems fail here.
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(PulseError::Config("no queues configured".into()));
        }
        if self.queues.contains_key(&self.dlq.name) {
            return Err(PulseError::Config(format!(
                "dead-letter queue name '{}' collides with a work queue",
                self.dlq.name
            )));
        }

        for (event_type, queue) in &self.event_queues {
            if !self.queues.contains_key(queue) {
                warn!(
                    event_type = %event_type,
                    queue = %queue,
                    "event type mapped to an unconfigured queue; publishes will fail"
                );
            }
        }

        Ok(())
    }
}
