//! In-process loopback implementations of the transport seams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use pulse_model::PresenceRecord;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{PresenceStore, PubSubTransport, TransportMessage};
use crate::error::Result;
use crate::hub::pattern;

/// Loopback pub/sub: a publish is delivered straight back to this instance
/// when a matching subscription exists, mirroring what the broker would
/// fan back to us.
#[derive(Debug)]
pub struct MemoryTransport {
    channels: Mutex<HashSet<String>>,
    patterns: Mutex<HashSet<String>>,
    tx: mpsc::Sender<TransportMessage>,
}

impl MemoryTransport {
    /// Create the transport and the incoming-message receiver the hub
    /// dispatches from.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<TransportMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                channels: Mutex::new(HashSet::new()),
                patterns: Mutex::new(HashSet::new()),
                tx,
            }),
            rx,
        )
    }

    /// Whether a broker-level subscription is currently open for `channel`.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .expect("subscription mutex poisoned")
            .contains(channel)
    }

    /// Whether a broker-level pattern subscription is currently open.
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.patterns
            .lock()
            .expect("subscription mutex poisoned")
            .contains(pattern)
    }

    fn wants(&self, channel: &str) -> bool {
        if self.is_subscribed(channel) {
            return true;
        }
        self.patterns
            .lock()
            .expect("subscription mutex poisoned")
            .iter()
            .any(|p| pattern::matches(p, channel))
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        if self.wants(channel) {
            // A dropped receiver means the hub is gone; delivery is
            // best-effort either way.
            let _ = self
                .tx
                .send(TransportMessage {
                    channel: channel.to_string(),
                    payload: payload.to_vec(),
                })
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.channels
            .lock()
            .expect("subscription mutex poisoned")
            .insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.channels
            .lock()
            .expect("subscription mutex poisoned")
            .remove(channel);
        Ok(())
    }

    async fn pattern_subscribe(&self, pattern: &str) -> Result<()> {
        self.patterns
            .lock()
            .expect("subscription mutex poisoned")
            .insert(pattern.to_string());
        Ok(())
    }

    async fn pattern_unsubscribe(&self, pattern: &str) -> Result<()> {
        self.patterns
            .lock()
            .expect("subscription mutex poisoned")
            .remove(pattern);
        Ok(())
    }
}

/// Presence records held in process memory with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: DashMap<String, (PresenceRecord, Instant)>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set(&self, record: PresenceRecord, ttl: Duration) -> Result<()> {
        self.records
            .insert(record.user_id.clone(), (record, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        let now = Instant::now();
        let record = self
            .records
            .get(user_id)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if record.is_none() {
            self.records
                .remove_if(user_id, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(record)
    }

    async fn online_user_ids(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.value().1 > now && entry.value().0.is_online())
            .filter(|entry| pattern::matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
