//! # Pulse Core
//!
//! The circulatory layer of the Pulse platform: an in-process event bus
//! that fans domain events out to prioritized work queues with retry,
//! backoff and dead-letter handling, a real-time pub/sub hub with presence
//! tracking, and the reliability primitives both depend on.
//!
//! ## Overview
//!
//! - **Event Bus** ([`bus::EventBus`]): publish path, per-queue worker
//!   pools, capped exponential backoff, dead-letter queue and job
//!   introspection. Delivery is at-least-once; consumers are expected to be
//!   idempotent.
//! - **Router** ([`routing::EventRouter`]): static event-type to
//!   queue/priority mapping with a `default` fallback.
//! - **Real-Time Hub** ([`hub::RealtimeHub`]): best-effort channel pub/sub
//!   with reference-counted subscriptions, pattern channels, presence and
//!   typing indicators.
//! - **Reliability** ([`reliability`]): circuit breaker, deduplicator,
//!   sliding-window rate limiter, batch executor.
//! - **Transports** ([`transport`]): Redis-backed broker and presence
//!   store for multi-instance deployments, in-memory equivalents for tests
//!   and single-node runs.
//!
//! ## Wiring
//!
//! Everything is explicit constructor wiring: build a [`config::BusConfig`]
//! (usually via [`config::ConfigLoader`]), construct the bus and hub once
//! at startup, and pass them by reference to producers and consumers.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pulse_core::bus::EventBus;
//! use pulse_core::config::ConfigLoader;
//! use pulse_core::hub::RealtimeHub;
//! use pulse_core::transport::{MemoryPresenceStore, MemoryTransport};
//!
//! # async fn wire() -> pulse_core::Result<()> {
//! let config = ConfigLoader::new().load()?;
//!
//! let bus = EventBus::new(config.clone())?;
//! bus.subscribe_fn("post.created", |event| async move {
//!     tracing::info!(event_type = event.event_type(), "post created");
//!     Ok(())
//! });
//! bus.start();
//!
//! let (transport, incoming) = MemoryTransport::channel(1024);
//! let hub = RealtimeHub::new(
//!     transport,
//!     incoming,
//!     Arc::new(MemoryPresenceStore::new()),
//!     &config,
//! );
//! hub.publish_user_online("user-1", "conn-1").await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod reliability;
pub mod routing;
pub mod transport;

pub use error::{PulseError, Result};

pub use bus::{BatchPublishOutcome, EventBus, EventHandler, PublishOptions};
pub use config::{BusConfig, ConfigLoader};
pub use hub::{RealtimeHub, SubscriptionHandle};
pub use metrics::{EventStage, LifecycleMetrics, MetricsSink};
pub use routing::{EventRouter, QueueRoute};

// Re-export the model crate so embedders need a single dependency.
pub use pulse_model as model;
