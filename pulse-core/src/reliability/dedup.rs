//! Idempotent-delivery deduplication: at-least-once delivery plus a
//! processed-marker check gives consumers an effectively-idempotent
//! guarantee.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::time::Instant;

use crate::error::Result;

fn marker_key(event_id: &str) -> String {
    format!("processed:{event_id}")
}

#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// Atomically check-and-set the processed marker: returns true when the
    /// event was already marked within the TTL, false (and sets the marker)
    /// otherwise.
    async fn is_duplicate(&self, event_id: &str, ttl: Duration) -> Result<bool>;

    /// Explicitly set the marker without checking.
    async fn mark_processed(&self, event_id: &str, ttl: Duration) -> Result<()>;

    /// Remove the marker so the event can be reprocessed.
    async fn clear_processed(&self, event_id: &str) -> Result<()>;
}

/// Process-local deduplicator with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryDeduplicator {
    seen: DashMap<String, Instant>,
}

impl MemoryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Deduplicator for MemoryDeduplicator {
    async fn is_duplicate(&self, event_id: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut duplicate = true;
        // The entry API serializes concurrent checkers for one key, which is
        // what makes check-and-set atomic here.
        self.seen
            .entry(event_id.to_string())
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + ttl;
                    duplicate = false;
                }
            })
            .or_insert_with(|| {
                duplicate = false;
                now + ttl
            });
        Ok(duplicate)
    }

    async fn mark_processed(&self, event_id: &str, ttl: Duration) -> Result<()> {
        self.seen
            .insert(event_id.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn clear_processed(&self, event_id: &str) -> Result<()> {
        self.seen.remove(event_id);
        Ok(())
    }
}

/// Distributed deduplicator: a `SET NX EX` marker shared by all instances.
#[derive(Clone)]
pub struct RedisDeduplicator {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeduplicator").finish()
    }
}

impl RedisDeduplicator {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Deduplicator for RedisDeduplicator {
    async fn is_duplicate(&self, event_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // SET NX EX is the atomic check-and-set; a reply of Nil means the
        // marker already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(marker_key(event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_none())
    }

    async fn mark_processed(&self, event_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(marker_key(event_id), 1, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn clear_processed(&self, event_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(marker_key(event_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sighting_is_not_a_duplicate() {
        let dedup = MemoryDeduplicator::new();
        let ttl = Duration::from_secs(3_600);

        assert!(!dedup.is_duplicate("evt-1", ttl).await.unwrap());
        assert!(dedup.is_duplicate("evt-1", ttl).await.unwrap());
        assert!(!dedup.is_duplicate("evt-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn clearing_allows_reprocessing() {
        let dedup = MemoryDeduplicator::new();
        let ttl = Duration::from_secs(3_600);

        dedup.mark_processed("evt-1", ttl).await.unwrap();
        assert!(dedup.is_duplicate("evt-1", ttl).await.unwrap());

        dedup.clear_processed("evt-1").await.unwrap();
        assert!(!dedup.is_duplicate("evt-1", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn markers_expire_after_ttl() {
        let dedup = MemoryDeduplicator::new();
        let ttl = Duration::from_secs(60);

        assert!(!dedup.is_duplicate("evt-1", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!dedup.is_duplicate("evt-1", ttl).await.unwrap());
    }
}
