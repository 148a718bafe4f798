//! Real-time pub/sub hub: channel subscriptions with local fan-out,
//! presence tracking, typing indicators and feed broadcast.
//!
//! Delivery is best-effort, at-most-once per connected subscriber. Callers
//! that need durability go through the event bus instead.

pub mod pattern;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use pulse_model::PresenceRecord;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{BusConfig, ChannelNames};
use crate::error::Result;
use crate::transport::{PresenceStore, PubSubTransport, TransportMessage};

/// Callback invoked with every payload delivered on a subscribed channel.
/// Dispatch is synchronous on the hub's listener task.
pub type ChannelHandler = Arc<dyn Fn(Value) + Send + Sync>;

type HandlerSet = Vec<(u64, ChannelHandler)>;

#[derive(Clone, Debug, Eq, PartialEq)]
enum SubscriptionTarget {
    Channel(String),
    Pattern(String),
}

/// Returned by `subscribe`/`pattern_subscribe`; pass back to `unsubscribe`.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    id: u64,
    target: SubscriptionTarget,
}

pub struct RealtimeHub {
    transport: Arc<dyn PubSubTransport>,
    presence: Arc<dyn PresenceStore>,
    channel_names: ChannelNames,
    presence_ttl: Duration,
    channels: Arc<DashMap<String, HandlerSet>>,
    patterns: Arc<DashMap<String, HandlerSet>>,
    next_id: AtomicU64,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("channels", &self.channels.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

impl RealtimeHub {
    /// Wire the hub to a transport pair and start the dispatch loop over the
    /// transport's incoming messages.
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        incoming: mpsc::Receiver<TransportMessage>,
        presence: Arc<dyn PresenceStore>,
        config: &BusConfig,
    ) -> Self {
        let channels: Arc<DashMap<String, HandlerSet>> = Arc::new(DashMap::new());
        let patterns: Arc<DashMap<String, HandlerSet>> = Arc::new(DashMap::new());

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            incoming,
            Arc::clone(&channels),
            Arc::clone(&patterns),
        ));

        Self {
            transport,
            presence,
            channel_names: config.channels.clone(),
            presence_ttl: config.presence_ttl,
            channels,
            patterns,
            next_id: AtomicU64::new(1),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    async fn dispatch_loop(
        mut incoming: mpsc::Receiver<TransportMessage>,
        channels: Arc<DashMap<String, HandlerSet>>,
        patterns: Arc<DashMap<String, HandlerSet>>,
    ) {
        while let Some(message) = incoming.recv().await {
            let payload: Value = match serde_json::from_slice(&message.payload) {
                Ok(value) => value,
                Err(err) => {
                    warn!(channel = %message.channel, error = %err, "dropping undecodable message");
                    continue;
                }
            };

            // Snapshot matching handlers before invoking them, so a handler
            // that subscribes or unsubscribes cannot deadlock the registry.
            let mut targets: Vec<ChannelHandler> = Vec::new();
            if let Some(entry) = channels.get(&message.channel) {
                targets.extend(entry.value().iter().map(|(_, handler)| Arc::clone(handler)));
            }
            for entry in patterns.iter() {
                if pattern::matches(entry.key(), &message.channel) {
                    targets.extend(entry.value().iter().map(|(_, handler)| Arc::clone(handler)));
                }
            }

            for handler in targets {
                let value = payload.clone();
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                    warn!(channel = %message.channel, "channel handler panicked");
                }
            }
        }
        debug!("hub dispatch loop stopped");
    }

    /// Broadcast to a channel across all instances. Fire-and-forget:
    /// failures are logged, never surfaced, because real-time data is
    /// best-effort.
    pub async fn publish(&self, channel: &str, payload: &Value) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(channel = %channel, error = %err, "failed to encode payload");
                return;
            }
        };
        if let Err(err) = self.transport.publish(channel, &bytes).await {
            warn!(channel = %channel, error = %err, "pub/sub publish failed");
        }
    }

    /// Register a handler. The first subscriber for a channel opens the
    /// transport subscription; later ones only join the local set.
    pub async fn subscribe<F>(&self, channel: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut entry = self.channels.entry(channel.to_string()).or_default();
            entry.push((id, Arc::new(handler)));
            entry.len() == 1
        };

        if first {
            if let Err(err) = self.transport.subscribe(channel).await {
                self.remove_handler(&SubscriptionTarget::Channel(channel.to_string()), id);
                return Err(err);
            }
            debug!(channel = %channel, "transport subscription opened");
        }

        Ok(SubscriptionHandle {
            id,
            target: SubscriptionTarget::Channel(channel.to_string()),
        })
    }

    /// Like `subscribe`, but the handler receives every channel matching the
    /// glob (used for per-user dynamic channels such as `typing:*:*`).
    pub async fn pattern_subscribe<F>(
        &self,
        pattern: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut entry = self.patterns.entry(pattern.to_string()).or_default();
            entry.push((id, Arc::new(handler)));
            entry.len() == 1
        };

        if first {
            if let Err(err) = self.transport.pattern_subscribe(pattern).await {
                self.remove_handler(&SubscriptionTarget::Pattern(pattern.to_string()), id);
                return Err(err);
            }
            debug!(pattern = %pattern, "transport pattern subscription opened");
        }

        Ok(SubscriptionHandle {
            id,
            target: SubscriptionTarget::Pattern(pattern.to_string()),
        })
    }

    /// Drop one handler. When a channel's handler set becomes empty the
    /// transport subscription is closed.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let now_empty = self.remove_handler(&handle.target, handle.id);
        if now_empty {
            match &handle.target {
                SubscriptionTarget::Channel(channel) => {
                    self.transport.unsubscribe(channel).await?;
                    debug!(channel = %channel, "transport subscription closed");
                }
                SubscriptionTarget::Pattern(pattern) => {
                    self.transport.pattern_unsubscribe(pattern).await?;
                    debug!(pattern = %pattern, "transport pattern subscription closed");
                }
            }
        }
        Ok(())
    }

    fn remove_handler(&self, target: &SubscriptionTarget, id: u64) -> bool {
        let (map, key) = match target {
            SubscriptionTarget::Channel(channel) => (&self.channels, channel),
            SubscriptionTarget::Pattern(pattern) => (&self.patterns, pattern),
        };
        let now_empty = match map.get_mut(key) {
            Some(mut entry) => {
                entry.retain(|(handler_id, _)| *handler_id != id);
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            map.remove_if(key, |_, handlers| handlers.is_empty());
        }
        now_empty
    }

    /// Write an online presence record (TTL'd) and announce it on the
    /// well-known presence channel.
    pub async fn publish_user_online(&self, user_id: &str, connection_id: &str) {
        let record = PresenceRecord::online(user_id, Some(connection_id.to_string()));
        if let Err(err) = self.presence.set(record, self.presence_ttl).await {
            warn!(user_id = %user_id, error = %err, "failed to write presence record");
        }

        let channel = self.channel_names.user_online.clone();
        self.publish(
            &channel,
            &json!({
                "userId": user_id,
                "connectionId": connection_id,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await;
        debug!(user_id = %user_id, "user online");
    }

    /// Overwrite the presence record as offline and announce it.
    pub async fn publish_user_offline(&self, user_id: &str) {
        let record = PresenceRecord::offline(user_id);
        if let Err(err) = self.presence.set(record, self.presence_ttl).await {
            warn!(user_id = %user_id, error = %err, "failed to write presence record");
        }

        let channel = self.channel_names.user_offline.clone();
        self.publish(
            &channel,
            &json!({
                "userId": user_id,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await;
        debug!(user_id = %user_id, "user offline");
    }

    pub async fn user_online_status(&self, user_id: &str) -> bool {
        match self.presence.get(user_id).await {
            Ok(record) => record.map(|r| r.is_online()).unwrap_or(false),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "presence lookup failed");
                false
            }
        }
    }

    pub async fn online_users(&self, pattern: &str) -> Vec<String> {
        match self.presence.online_user_ids(pattern).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "online user listing failed");
                Vec::new()
            }
        }
    }

    /// Typing indicators ride per-conversation dynamic channels
    /// (`typing:{from}:{to}`), covered by the `typing:*:*` pattern.
    pub async fn publish_typing_indicator(
        &self,
        user_id: &str,
        recipient_id: &str,
        is_typing: bool,
    ) {
        let channel = self.channel_names.typing(user_id, recipient_id);
        self.publish(
            &channel,
            &json!({
                "userId": user_id,
                "recipientId": recipient_id,
                "isTyping": is_typing,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await;
    }

    /// Push a notification payload to one user's notification channel.
    pub async fn broadcast_notification(&self, user_id: &str, notification: &Value) {
        let channel = self.channel_names.notifications(user_id);
        self.publish(&channel, notification).await;
    }

    /// Fan a new post out to one feed channel per follower, concurrently.
    /// This is the feed fan-out primitive used by content-creation handlers.
    pub async fn broadcast_post_created(
        &self,
        post_id: &str,
        author_id: &str,
        follower_ids: &[String],
    ) {
        let payload = json!({
            "type": "POST_CREATED",
            "postId": post_id,
            "authorId": author_id,
            "timestamp": Utc::now().timestamp_millis(),
        });

        join_all(follower_ids.iter().map(|follower_id| {
            let channel = self.channel_names.feed(follower_id);
            let payload = payload.clone();
            async move { self.publish(&channel, &payload).await }
        }))
        .await;

        debug!(
            post_id = %post_id,
            followers = follower_ids.len(),
            "post broadcast to followers"
        );
    }

    /// Stop the dispatch loop. Subscriptions held by the transport are left
    /// to the connection teardown.
    pub fn close(&self) {
        if let Some(task) = self
            .dispatcher
            .lock()
            .expect("dispatcher mutex poisoned")
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        self.close();
    }
}
