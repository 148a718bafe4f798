//! Transport seams shared by the hub and the presence helpers.
//!
//! The cross-process broker is Redis; the in-memory implementations provide
//! the same contract for tests and single-node deployments, the way the
//! in-proc bus sits beside the external broker path.

mod memory;
mod redis;

pub use memory::{MemoryPresenceStore, MemoryTransport};
pub use redis::{RedisPresenceStore, RedisTransport};

use std::time::Duration;

use async_trait::async_trait;
use pulse_model::PresenceRecord;

use crate::error::Result;

/// A message delivered by the broker to this instance's subscriber
/// connection. For pattern subscriptions, `channel` is the concrete channel
/// the message was published to.
#[derive(Clone, Debug)]
pub struct TransportMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Cross-process pub/sub broker connection, shared by all hub operations.
/// Incoming messages arrive on the receiver handed out at construction.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<()>;
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
    async fn pattern_subscribe(&self, pattern: &str) -> Result<()>;
    async fn pattern_unsubscribe(&self, pattern: &str) -> Result<()>;
}

/// TTL-backed presence records. The TTL is the safety net for ungraceful
/// disconnects; explicit status changes overwrite the record.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set(&self, record: PresenceRecord, ttl: Duration) -> Result<()>;
    async fn get(&self, user_id: &str) -> Result<Option<PresenceRecord>>;
    /// User ids with a live online record whose id matches the glob.
    async fn online_user_ids(&self, pattern: &str) -> Result<Vec<String>>;
}
