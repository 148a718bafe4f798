//! Worker pools: one pool per queue, sized by the queue's configured
//! concurrency. Handler failures are converted into the retry state machine
//! at this boundary and never escape a worker task.

use std::sync::Arc;

use chrono::Utc;
use pulse_model::{DomainEvent, Job};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, warn};

use super::queue::{DeadLetterStore, FailOutcome, JobQueue};
use super::{EventHandler, HandlerMap};
use crate::config::LeaseConfig;
use crate::error::{PulseError, Result};
use crate::metrics::{EventStage, MetricsSink};

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub handlers: Arc<HandlerMap>,
    pub dlq: Arc<DeadLetterStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub lease: LeaseConfig,
    pub shutdown: CancellationToken,
}

pub(crate) fn spawn_worker_pool(ctx: WorkerContext) -> Vec<JoinHandle<()>> {
    let parallelism = ctx.queue.descriptor().concurrency;
    let worker_group = format!("{}-{}", ctx.queue.descriptor().name, std::process::id());

    (0..parallelism)
        .map(|i| {
            let worker_id = format!("{}-w{}", worker_group, i);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    if ctx.shutdown.is_cancelled() {
                        debug!(worker = %worker_id, "worker shutting down");
                        break;
                    }
                    let Some(job) = ctx.queue.dequeue(&ctx.shutdown).await else {
                        debug!(worker = %worker_id, "worker shutting down");
                        break;
                    };
                    process_job(&worker_id, &ctx, job).await;
                }
            })
        })
        .collect()
}

async fn process_job(worker_id: &str, ctx: &WorkerContext, job: Job) {
    let span = debug_span!(
        "process_job",
        worker = %worker_id,
        queue = %job.queue,
        job_id = %job.id,
        event_type = %job.event_type,
        attempt = job.attempts_made + 1,
    );

    async {
        // Renew the lease in the background while the handler runs, so the
        // housekeeper only reclaims genuinely stalled workers.
        let renew_cancel = CancellationToken::new();
        let renew_handle = {
            let queue = Arc::clone(&ctx.queue);
            let cancel = renew_cancel.clone();
            let renew_every = ctx.lease.lock_renew();
            let job_id = job.id;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(renew_every) => {
                            if !queue.renew(job_id) {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let outcome = run_handlers(ctx, &job).await;
        renew_cancel.cancel();
        let _ = renew_handle.await;

        match outcome {
            Ok(()) => {
                if ctx.queue.complete(job.id) {
                    ctx.metrics
                        .incr(&job.event_type, EventStage::Processed)
                        .await;
                    let elapsed = (Utc::now() - job.enqueued_at).to_std().unwrap_or_default();
                    ctx.metrics.record_duration(&job.event_type, elapsed).await;
                } else {
                    debug!("completion ignored; lease was already reclaimed");
                }
            }
            Err(err) => {
                ctx.metrics.incr(&job.event_type, EventStage::Failed).await;
                match ctx.queue.fail(job.id, &err.to_string()) {
                    Some(FailOutcome::Retry { delay }) => {
                        warn!(error = %err, ?delay, "handler failed; retry scheduled");
                    }
                    Some(FailOutcome::DeadLettered(record)) => {
                        error!(
                            error = %record.last_error,
                            "job exhausted retries; moved to dead letter queue"
                        );
                        ctx.dlq.insert(record);
                        ctx.metrics
                            .incr(&job.event_type, EventStage::DeadLettered)
                            .await;
                    }
                    None => debug!("failure ignored; lease was already reclaimed"),
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Run every registered handler for the job's event type under the queue's
/// deadline. Handlers run inside their own task so a panic is contained and
/// reported like any other handler error.
async fn run_handlers(ctx: &WorkerContext, job: &Job) -> Result<()> {
    let event: DomainEvent = serde_json::from_slice(&job.payload)?;

    let handlers: Vec<Arc<dyn EventHandler>> = ctx
        .handlers
        .get(&job.event_type)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();

    if handlers.is_empty() {
        debug!("no handlers registered for event type");
        return Ok(());
    }

    let timeout = ctx.queue.descriptor().timeout;
    let mut task = tokio::spawn(async move {
        for handler in handlers {
            handler
                .handle(&event)
                .await
                .map_err(|err| PulseError::Handler(format!("{err:#}")))?;
        }
        Ok::<(), PulseError>(())
    });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(PulseError::Handler(format!(
            "handler task aborted: {join_err}"
        ))),
        Err(_) => {
            task.abort();
            Err(PulseError::HandlerTimeout(timeout))
        }
    }
}

/// Periodically scan every queue for expired leases and push stalled jobs
/// through the normal retry / dead-letter path.
pub(crate) fn spawn_housekeeper(
    queues: Vec<Arc<JobQueue>>,
    dlq: Arc<DeadLetterStore>,
    metrics: Arc<dyn MetricsSink>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    for queue in &queues {
                        for (job_id, outcome) in queue.reap_expired() {
                            match outcome {
                                FailOutcome::Retry { delay } => {
                                    warn!(
                                        queue = %queue.descriptor().name,
                                        %job_id,
                                        ?delay,
                                        "stalled lease reclaimed; retry scheduled"
                                    );
                                }
                                FailOutcome::DeadLettered(record) => {
                                    error!(
                                        queue = %queue.descriptor().name,
                                        %job_id,
                                        "stalled job exhausted retries; moved to dead letter queue"
                                    );
                                    metrics
                                        .incr(&record.original_event_type, EventStage::DeadLettered)
                                        .await;
                                    dlq.insert(record);
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}
