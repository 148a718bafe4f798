//! Redis-backed transport: pub/sub broker connection plus presence records.
//!
//! Connections are process-wide singletons safe for concurrent use: one
//! multiplexed manager for commands and publishes, one dedicated pub/sub
//! connection whose stream half is drained by a forwarding task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pulse_model::PresenceRecord;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, aio::PubSubSink};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use super::{PresenceStore, PubSubTransport, TransportMessage};
use crate::error::Result;

const PRESENCE_PREFIX: &str = "user:online:";

pub struct RedisTransport {
    conn: ConnectionManager,
    sink: Mutex<PubSubSink>,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport").finish()
    }
}

impl RedisTransport {
    /// Open both connections and start forwarding broker messages to the
    /// returned receiver.
    pub async fn connect(
        url: &str,
        buffer: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportMessage>)> {
        info!(url = %url, "connecting pub/sub transport to Redis");

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let pubsub = client.get_async_pubsub().await?;
        let (sink, mut stream) = pubsub.split();

        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let message = TransportMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload_bytes().to_vec(),
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            debug!("redis pub/sub stream closed");
        });

        Ok((
            Arc::new(Self {
                conn,
                sink: Mutex::new(sink),
            }),
            rx,
        ))
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.sink.lock().await.subscribe(channel).await?;
        debug!(channel = %channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.sink.lock().await.unsubscribe(channel).await?;
        debug!(channel = %channel, "unsubscribed");
        Ok(())
    }

    async fn pattern_subscribe(&self, pattern: &str) -> Result<()> {
        self.sink.lock().await.psubscribe(pattern).await?;
        debug!(pattern = %pattern, "pattern subscribed");
        Ok(())
    }

    async fn pattern_unsubscribe(&self, pattern: &str) -> Result<()> {
        self.sink.lock().await.punsubscribe(pattern).await?;
        debug!(pattern = %pattern, "pattern unsubscribed");
        Ok(())
    }
}

/// Presence records as TTL'd keys (`user:online:{userId}`), shared across
/// instances.
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisPresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPresenceStore").finish()
    }
}

impl RedisPresenceStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(user_id: &str) -> String {
        format!("{PRESENCE_PREFIX}{user_id}")
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set(&self, record: PresenceRecord, ttl: Duration) -> Result<()> {
        let key = Self::key(&record.user_id);
        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(user_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn online_user_ids(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{PRESENCE_PREFIX}{pattern}")).await?;

        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(json) = raw else { continue };
            let Ok(record) = serde_json::from_str::<PresenceRecord>(&json) else {
                continue;
            };
            if record.is_online() {
                ids.push(record.user_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
