//! The event bus: publish path, worker pools, retry/backoff, dead-letter
//! handling and job introspection.
//!
//! One `EventBus` instance is built at startup and passed by reference to
//! producers and consumers; there is no global registry. `start()` spawns
//! the worker pools, `shutdown()` drains them.

mod queue;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use pulse_model::{DomainEvent, Job, JobHandle, JobId, JobInfo, JobState, QueueStats};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::error::{PulseError, Result};
use crate::metrics::{EventStage, LifecycleMetrics, MetricsSink};
use crate::routing::EventRouter;

use queue::{DeadLetterStore, JobQueue};
use worker::{WorkerContext, spawn_housekeeper, spawn_worker_pool};

/// In-process consumer of dequeued events. Multiple handlers may be
/// registered per event type; all of them run, in registration order.
///
/// Delivery is at-least-once: implementations are responsible for idempotent
/// side effects (see [`crate::reliability::Deduplicator`]).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}

pub(crate) type HandlerMap = DashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Per-publish overrides.
#[derive(Clone, Copy, Debug, Default)]
pub struct PublishOptions {
    /// Caller-supplied idempotency key; a job with the same id already in
    /// the queue makes the publish a no-op.
    pub job_id: Option<JobId>,
    /// Defer the first attempt.
    pub delay: Option<Duration>,
    /// Override the router's priority.
    pub priority: Option<u8>,
}

/// Counts returned by [`EventBus::publish_batch`]. Partial failure is
/// expected; the batch as a whole never errors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchPublishOutcome {
    pub successful: usize,
    pub failed: usize,
}

pub struct EventBus {
    config: Arc<BusConfig>,
    router: EventRouter,
    queues: HashMap<String, Arc<JobQueue>>,
    dlq: Arc<DeadLetterStore>,
    handlers: Arc<HandlerMap>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queues", &self.queues.len())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl EventBus {
    /// Build a bus with the in-memory metrics registry.
    pub fn new(config: BusConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(LifecycleMetrics::new()))
    }

    /// Build a bus with an explicit metrics sink (e.g. the Redis-backed one
    /// for multi-instance deployments).
    pub fn with_metrics(config: BusConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let queues: HashMap<String, Arc<JobQueue>> = config
            .queues
            .iter()
            .map(|(name, descriptor)| {
                (
                    name.clone(),
                    Arc::new(JobQueue::new(
                        descriptor.clone(),
                        config.retry,
                        config.lease,
                    )),
                )
            })
            .collect();

        Ok(Self {
            router: EventRouter::new(Arc::clone(&config)),
            dlq: Arc::new(DeadLetterStore::new(config.dlq.ttl)),
            config,
            queues,
            handlers: Arc::new(HandlerMap::new()),
            metrics,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn one worker pool per queue plus the lease housekeeper.
    /// Idempotent; the second call is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().expect("task mutex poisoned");
        for queue in self.queues.values() {
            tasks.extend(spawn_worker_pool(WorkerContext {
                queue: Arc::clone(queue),
                handlers: Arc::clone(&self.handlers),
                dlq: Arc::clone(&self.dlq),
                metrics: Arc::clone(&self.metrics),
                lease: self.config.lease,
                shutdown: self.shutdown.clone(),
            }));
        }
        tasks.push(spawn_housekeeper(
            self.queues.values().cloned().collect(),
            Arc::clone(&self.dlq),
            Arc::clone(&self.metrics),
            self.config.lease.housekeeper_interval(),
            self.shutdown.clone(),
        ));

        info!(queues = self.queues.len(), "event bus started");
    }

    /// Cancel every worker and wait for them to drain, bounded per task.
    pub async fn shutdown(&self) {
        info!("shutting down event bus");
        self.shutdown.cancel();

        let tasks = {
            let mut guard = self.tasks.lock().expect("task mutex poisoned");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            match tokio::time::timeout(Duration::from_secs(30), task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "worker task failed during shutdown"),
                Err(_) => warn!("worker task timed out during shutdown"),
            }
        }

        info!("event bus shutdown complete");
    }

    /// Serialize the event, resolve its queue and priority, and enqueue a
    /// job. Routing and transport failures surface to the caller; the bus
    /// never auto-retries a failed publish.
    pub async fn publish(&self, event: &DomainEvent) -> Result<JobHandle> {
        self.publish_with(event, PublishOptions::default()).await
    }

    pub async fn publish_with(
        &self,
        event: &DomainEvent,
        options: PublishOptions,
    ) -> Result<JobHandle> {
        if self.shutdown.is_cancelled() {
            return Err(PulseError::ShuttingDown);
        }

        let event_type = event.event_type();
        let route = self.router.resolve(event_type);
        let descriptor = self.router.descriptor(&route.queue)?;
        let queue = self
            .queues
            .get(&route.queue)
            .ok_or_else(|| PulseError::QueueNotConfigured(route.queue.clone()))?;

        let payload = serde_json::to_vec(event)?;
        let priority = options.priority.unwrap_or(route.priority);
        let job = Job {
            id: options.job_id.unwrap_or_default(),
            queue: route.queue.clone(),
            event_type: event_type.to_string(),
            payload,
            priority,
            attempts_made: 0,
            max_attempts: descriptor.max_attempts,
            enqueued_at: Utc::now(),
        };
        let handle = JobHandle {
            job_id: job.id,
            queue: job.queue.clone(),
            event_type: job.event_type.clone(),
            priority,
        };

        if queue.enqueue(job, options.delay) {
            debug!(
                event_type = %event_type,
                queue = %handle.queue,
                job_id = %handle.job_id,
                priority,
                "event published"
            );
        } else {
            debug!(
                event_type = %event_type,
                job_id = %handle.job_id,
                "duplicate job id; enqueue skipped"
            );
        }
        self.metrics.incr(event_type, EventStage::Published).await;

        Ok(handle)
    }

    /// Publish every event independently and concurrently. One event's
    /// failure never fails the batch; the outcome carries the counts.
    pub async fn publish_batch(&self, events: &[DomainEvent]) -> BatchPublishOutcome {
        let results = join_all(events.iter().map(|event| self.publish(event))).await;

        let successful = results.iter().filter(|result| result.is_ok()).count();
        let outcome = BatchPublishOutcome {
            successful,
            failed: results.len() - successful,
        };
        debug!(
            successful = outcome.successful,
            failed = outcome.failed,
            "batch publish finished"
        );
        outcome
    }

    /// Register a handler for an event type. All handlers registered for a
    /// type are invoked for every matching job.
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        debug!(event_type = %event_type, "handler registered");
    }

    /// Convenience wrapper for closure handlers.
    pub fn subscribe_fn<F, Fut>(&self, event_type: &str, handler: F)
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler(handler)));
    }

    /// Read-only snapshot of queue counters. With no name, every queue plus
    /// the dead-letter queue is included.
    pub fn queue_stats(&self, queue: Option<&str>) -> Result<HashMap<String, QueueStats>> {
        let mut stats = HashMap::new();
        match queue {
            Some(name) if name == self.config.dlq.name => {
                stats.insert(name.to_string(), self.dlq_stats());
            }
            Some(name) => {
                let queue = self
                    .queues
                    .get(name)
                    .ok_or_else(|| PulseError::QueueNotConfigured(name.to_string()))?;
                stats.insert(name.to_string(), queue.stats());
            }
            None => {
                for (name, queue) in &self.queues {
                    stats.insert(name.clone(), queue.stats());
                }
                stats.insert(self.config.dlq.name.clone(), self.dlq_stats());
            }
        }
        Ok(stats)
    }

    fn dlq_stats(&self) -> QueueStats {
        QueueStats {
            waiting: self.dlq.len() as u64,
            ..Default::default()
        }
    }

    /// Inspect a job in a queue, or a dead-letter record when the queue name
    /// is the DLQ's.
    pub fn job_details(&self, queue: &str, job_id: JobId) -> Result<JobInfo> {
        if queue == self.config.dlq.name {
            let record = self
                .dlq
                .get(job_id)
                .ok_or_else(|| PulseError::NotFound(format!("job {job_id} not found in DLQ")))?;
            return Ok(JobInfo {
                id: record.original_job_id,
                queue: queue.to_string(),
                event_type: record.original_event_type,
                state: JobState::DeadLetter,
                priority: 0,
                attempts_made: 0,
                max_attempts: 0,
                enqueued_at: record.failed_at,
                last_error: Some(record.last_error),
            });
        }

        let queue = self
            .queues
            .get(queue)
            .ok_or_else(|| PulseError::QueueNotConfigured(queue.to_string()))?;
        queue
            .job_details(job_id)
            .ok_or_else(|| PulseError::NotFound(format!("job {job_id} not found")))
    }

    /// Re-publish a dead-lettered job to its original queue with the attempt
    /// counter reset, removing the record. A second call for the same id
    /// fails with `NotFound`.
    pub async fn retry_from_dlq(&self, job_id: JobId) -> Result<JobHandle> {
        let record = self.dlq.take(job_id).ok_or_else(|| {
            PulseError::NotFound(format!("job {job_id} not found in dead letter queue"))
        })?;

        let route = self.router.resolve(&record.original_event_type);
        let descriptor = self.router.descriptor(&route.queue)?;
        let queue = self
            .queues
            .get(&route.queue)
            .ok_or_else(|| PulseError::QueueNotConfigured(route.queue.clone()))?;

        // The original id is kept so the replay stays traceable to the
        // dead-letter record it came from.
        let job = Job {
            id: record.original_job_id,
            queue: route.queue.clone(),
            event_type: record.original_event_type.clone(),
            payload: record.original_payload,
            priority: route.priority,
            attempts_made: 0,
            max_attempts: descriptor.max_attempts,
            enqueued_at: Utc::now(),
        };
        let handle = JobHandle {
            job_id: job.id,
            queue: job.queue.clone(),
            event_type: job.event_type.clone(),
            priority: job.priority,
        };
        queue.enqueue(job, None);

        info!(
            job_id = %handle.job_id,
            queue = %handle.queue,
            event_type = %handle.event_type,
            "job replayed from dead letter queue"
        );
        Ok(handle)
    }
}
