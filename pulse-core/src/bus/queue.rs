//! In-process job queue: one instance per configured queue name.
//!
//! State machine per job: Waiting (ready heap, priority-ordered) ->
//! Active (leased to a worker) -> Completed (dropped, counter only) or
//! Delayed (retry-pending, due-time ordered) -> ... -> DeadLetter after the
//! retry budget is spent. A retried job takes a fresh sequence number, so it
//! re-enters at the back of its priority class.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use pulse_model::{DeadLetterRecord, Job, JobId, JobInfo, JobState, QueueStats};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{LeaseConfig, QueueDescriptor, RetryPolicy};

/// Fallback poll cadence while idle; the notify permit covers the race
/// between a state check and the wait.
const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    last_error: Option<String>,
}

#[derive(Debug)]
struct ReadyEntry {
    priority: u8,
    seq: u64,
    queued: QueuedJob,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    // Max-heap: highest priority first, then oldest sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct ActiveEntry {
    queued: QueuedJob,
    lease_expires_at: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BTreeMap<(Instant, u64), QueuedJob>,
    active: HashMap<JobId, ActiveEntry>,
    seq: u64,
    completed: u64,
    failed: u64,
}

impl QueueInner {
    fn contains(&self, id: JobId) -> bool {
        self.active.contains_key(&id)
            || self.ready.iter().any(|entry| entry.queued.job.id == id)
            || self.delayed.values().any(|queued| queued.job.id == id)
    }

    fn push_ready(&mut self, queued: QueuedJob) {
        self.seq += 1;
        self.ready.push(ReadyEntry {
            priority: queued.job.priority,
            seq: self.seq,
            queued,
        });
    }

    fn push_delayed(&mut self, queued: QueuedJob, due: Instant) {
        self.seq += 1;
        self.delayed.insert((due, self.seq), queued);
    }

    /// Move due delayed jobs into the ready heap; returns the next due
    /// instant if any remain.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        loop {
            let due = match self.delayed.first_key_value() {
                Some((&(due, _), _)) => due,
                None => return None,
            };
            if due > now {
                return Some(due);
            }
            if let Some((_, queued)) = self.delayed.pop_first() {
                self.push_ready(queued);
            }
        }
    }
}

/// Outcome of a failed (or stalled) processing attempt.
#[derive(Debug)]
pub(crate) enum FailOutcome {
    /// Scheduled for another attempt after the backoff delay.
    Retry { delay: Duration },
    /// Retry budget spent; the job left the queue for the DLQ.
    DeadLettered(DeadLetterRecord),
}

pub(crate) struct JobQueue {
    descriptor: QueueDescriptor,
    retry: RetryPolicy,
    lease: LeaseConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.descriptor.name)
            .finish()
    }
}

impl JobQueue {
    pub(crate) fn new(
        descriptor: QueueDescriptor,
        retry: RetryPolicy,
        lease: LeaseConfig,
    ) -> Self {
        Self {
            descriptor,
            retry,
            lease,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn descriptor(&self) -> &QueueDescriptor {
        &self.descriptor
    }

    /// Idempotent enqueue: a job id already present anywhere in the queue is
    /// a no-op, which is what makes caller-supplied job ids usable as
    /// idempotency keys. Returns whether the job was accepted.
    pub(crate) fn enqueue(&self, job: Job, delay: Option<Duration>) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.contains(job.id) {
            return false;
        }

        let queued = QueuedJob {
            job,
            last_error: None,
        };
        match delay {
            Some(delay) if !delay.is_zero() => {
                inner.push_delayed(queued, Instant::now() + delay);
            }
            _ => inner.push_ready(queued),
        }
        drop(inner);

        self.notify.notify_one();
        true
    }

    /// Claim the next ready job under a lease. Suspends until work arrives
    /// or the token is cancelled.
    pub(crate) async fn dequeue(&self, shutdown: &CancellationToken) -> Option<Job> {
        loop {
            let next_due = {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                let now = Instant::now();
                let next_due = inner.promote_due(now);

                if let Some(entry) = inner.ready.pop() {
                    let job = entry.queued.job.clone();
                    inner.active.insert(
                        job.id,
                        ActiveEntry {
                            queued: entry.queued,
                            lease_expires_at: now + self.lease.lock_duration(),
                        },
                    );
                    return Some(job);
                }
                next_due
            };

            let sleep_for = next_due
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL);

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Extend the lease on an active job. Returns false if the job is no
    /// longer active (completed, reaped or unknown).
    pub(crate) fn renew(&self, id: JobId) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        match inner.active.get_mut(&id) {
            Some(entry) => {
                entry.lease_expires_at = Instant::now() + self.lease.lock_duration();
                true
            }
            None => false,
        }
    }

    /// Acknowledge success. The job is dropped (`removeOnComplete`) and only
    /// counted. Returns false if the job was not active.
    pub(crate) fn complete(&self, id: JobId) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.active.remove(&id).is_some() {
            inner.completed += 1;
            true
        } else {
            false
        }
    }

    /// Record a failed attempt: schedule a retry with capped exponential
    /// backoff, or hand the job over for the dead-letter queue once the
    /// budget is spent. Returns None if the job was not active (e.g. already
    /// reaped by the housekeeper).
    pub(crate) fn fail(&self, id: JobId, error: &str) -> Option<FailOutcome> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let entry = inner.active.remove(&id)?;
        let outcome = Self::fail_locked(&mut inner, entry.queued, error, &self.retry);
        drop(inner);

        if matches!(outcome, FailOutcome::Retry { .. }) {
            // A retry may now be the earliest due entry; wake a waiter so it
            // recomputes its sleep.
            self.notify.notify_one();
        }
        Some(outcome)
    }

    fn fail_locked(
        inner: &mut QueueInner,
        mut queued: QueuedJob,
        error: &str,
        retry: &RetryPolicy,
    ) -> FailOutcome {
        let prior_attempts = queued.job.attempts_made;
        queued.job.attempts_made = prior_attempts + 1;
        queued.last_error = Some(error.to_string());

        if queued.job.attempts_made < queued.job.max_attempts {
            let delay = retry.delay_for(prior_attempts);
            inner.push_delayed(queued, Instant::now() + delay);
            FailOutcome::Retry { delay }
        } else {
            inner.failed += 1;
            FailOutcome::DeadLettered(DeadLetterRecord {
                original_job_id: queued.job.id,
                original_event_type: queued.job.event_type,
                original_payload: queued.job.payload,
                last_error: error.to_string(),
                failed_at: Utc::now(),
            })
        }
    }

    /// Treat workers holding a lease past its expiry as failed: resurrect
    /// the job through the normal retry path, or dead-letter it. This is the
    /// stalled-job detector that prevents silent loss on worker crash.
    pub(crate) fn reap_expired(&self) -> Vec<(JobId, FailOutcome)> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let now = Instant::now();
        let expired: Vec<JobId> = inner
            .active
            .iter()
            .filter(|(_, entry)| entry.lease_expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut outcomes = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = inner.active.remove(&id) {
                let outcome =
                    Self::fail_locked(&mut inner, entry.queued, "lease expired", &self.retry);
                outcomes.push((id, outcome));
            }
        }
        drop(inner);

        if !outcomes.is_empty() {
            self.notify.notify_one();
        }
        outcomes
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        QueueStats {
            active: inner.active.len() as u64,
            waiting: inner.ready.len() as u64,
            delayed: inner.delayed.len() as u64,
            completed: inner.completed,
            failed: inner.failed,
        }
    }

    pub(crate) fn job_details(&self, id: JobId) -> Option<JobInfo> {
        let inner = self.inner.lock().expect("queue mutex poisoned");

        let (queued, state) = if let Some(entry) = inner.active.get(&id) {
            (&entry.queued, JobState::Active)
        } else if let Some(entry) = inner.ready.iter().find(|e| e.queued.job.id == id) {
            (&entry.queued, JobState::Waiting)
        } else if let Some(queued) = inner.delayed.values().find(|q| q.job.id == id) {
            (queued, JobState::Delayed)
        } else {
            return None;
        };

        Some(JobInfo {
            id,
            queue: queued.job.queue.clone(),
            event_type: queued.job.event_type.clone(),
            state,
            priority: queued.job.priority,
            attempts_made: queued.job.attempts_made,
            max_attempts: queued.job.max_attempts,
            enqueued_at: queued.job.enqueued_at,
            last_error: queued.last_error.clone(),
        })
    }
}

/// Storage for jobs that exhausted their retry budget. Records expire after
/// the configured TTL; expiry is applied lazily on access.
#[derive(Debug)]
pub(crate) struct DeadLetterStore {
    ttl: Duration,
    records: Mutex<HashMap<JobId, (DeadLetterRecord, Instant)>>,
}

impl DeadLetterStore {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, record: DeadLetterRecord) {
        let mut records = self.records.lock().expect("dlq mutex poisoned");
        let expires_at = Instant::now() + self.ttl;
        records.insert(record.original_job_id, (record, expires_at));
    }

    /// Remove and return a record, if it exists and has not expired.
    pub(crate) fn take(&self, id: JobId) -> Option<DeadLetterRecord> {
        let mut records = self.records.lock().expect("dlq mutex poisoned");
        Self::prune(&mut records);
        records.remove(&id).map(|(record, _)| record)
    }

    pub(crate) fn get(&self, id: JobId) -> Option<DeadLetterRecord> {
        let mut records = self.records.lock().expect("dlq mutex poisoned");
        Self::prune(&mut records);
        records.get(&id).map(|(record, _)| record.clone())
    }

    pub(crate) fn len(&self) -> usize {
        let mut records = self.records.lock().expect("dlq mutex poisoned");
        Self::prune(&mut records);
        records.len()
    }

    fn prune(records: &mut HashMap<JobId, (DeadLetterRecord, Instant)>) {
        let now = Instant::now();
        records.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn test_queue(max_attempts: u32) -> JobQueue {
        let config = BusConfig::default();
        let descriptor = QueueDescriptor {
            name: "default".to_string(),
            default_priority: 5,
            max_attempts,
            concurrency: 1,
            timeout: Duration::from_secs(5),
        };
        JobQueue::new(descriptor, config.retry, config.lease)
    }

    fn job(queue: &JobQueue, priority: u8) -> Job {
        Job {
            id: JobId::new(),
            queue: queue.descriptor().name.clone(),
            event_type: "like.added".to_string(),
            payload: b"{}".to_vec(),
            priority,
            attempts_made: 0,
            max_attempts: queue.descriptor().max_attempts,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dequeues_in_priority_order_then_fifo() {
        let queue = test_queue(3);
        let shutdown = CancellationToken::new();

        let low = job(&queue, 2);
        let high = job(&queue, 9);
        let mid_first = job(&queue, 5);
        let mid_second = job(&queue, 5);

        assert!(queue.enqueue(low.clone(), None));
        assert!(queue.enqueue(mid_first.clone(), None));
        assert!(queue.enqueue(mid_second.clone(), None));
        assert!(queue.enqueue(high.clone(), None));

        let order: Vec<JobId> = [
            queue.dequeue(&shutdown).await.unwrap().id,
            queue.dequeue(&shutdown).await.unwrap().id,
            queue.dequeue(&shutdown).await.unwrap().id,
            queue.dequeue(&shutdown).await.unwrap().id,
        ]
        .into();

        assert_eq!(order, vec![high.id, mid_first.id, mid_second.id, low.id]);
    }

    #[tokio::test]
    async fn duplicate_job_ids_are_rejected() {
        let queue = test_queue(3);
        let first = job(&queue, 5);
        let mut second = first.clone();
        second.payload = b"other".to_vec();

        assert!(queue.enqueue(first, None));
        assert!(!queue.enqueue(second, None));
        assert_eq!(queue.stats().waiting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_delayed_then_promoted() {
        let queue = test_queue(3);
        let shutdown = CancellationToken::new();

        let original = job(&queue, 5);
        queue.enqueue(original.clone(), None);

        let claimed = queue.dequeue(&shutdown).await.unwrap();
        let before = Instant::now();
        let outcome = queue.fail(claimed.id, "boom").expect("job was active");
        match outcome {
            FailOutcome::Retry { delay } => assert_eq!(delay, Duration::from_secs(1)),
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(queue.stats().delayed, 1);

        let retried = queue.dequeue(&shutdown).await.unwrap();
        assert_eq!(retried.id, original.id);
        assert_eq!(retried.attempts_made, 1);
        assert!(Instant::now() - before >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_move_to_dead_letter_exactly_once() {
        let queue = test_queue(2);
        let shutdown = CancellationToken::new();

        let original = job(&queue, 5);
        queue.enqueue(original.clone(), None);

        let first = queue.dequeue(&shutdown).await.unwrap();
        assert!(matches!(
            queue.fail(first.id, "boom").unwrap(),
            FailOutcome::Retry { .. }
        ));

        let second = queue.dequeue(&shutdown).await.unwrap();
        let outcome = queue.fail(second.id, "boom again").unwrap();
        let record = match outcome {
            FailOutcome::DeadLettered(record) => record,
            other => panic!("expected dead letter, got {other:?}"),
        };
        assert_eq!(record.original_job_id, original.id);
        assert_eq!(record.last_error, "boom again");

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.delayed, 0);

        // A second failure report for the same job is ignored
        assert!(queue.fail(original.id, "straggler").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_are_reaped_through_the_retry_path() {
        let queue = test_queue(2);
        let shutdown = CancellationToken::new();

        let original = job(&queue, 5);
        queue.enqueue(original.clone(), None);
        let claimed = queue.dequeue(&shutdown).await.unwrap();

        // Nothing to reap while the lease is fresh
        assert!(queue.reap_expired().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let outcomes = queue.reap_expired();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, FailOutcome::Retry { .. }));

        // Renewal keeps a lease alive
        queue.enqueue(job(&queue, 5), None);
        let other = queue.dequeue(&shutdown).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(queue.renew(other.id));
        tokio::time::sleep(Duration::from_secs(20)).await;
        let reaped: Vec<JobId> = queue.reap_expired().into_iter().map(|(id, _)| id).collect();
        assert!(!reaped.contains(&other.id));

        // The late completion from the stalled worker is a no-op
        assert!(!queue.complete(claimed.id));
    }

    #[tokio::test]
    async fn job_details_reflect_state() {
        let queue = test_queue(3);
        let shutdown = CancellationToken::new();

        let waiting = job(&queue, 5);
        queue.enqueue(waiting.clone(), None);
        let delayed = job(&queue, 5);
        queue.enqueue(delayed.clone(), Some(Duration::from_secs(60)));

        let info = queue.job_details(waiting.id).unwrap();
        assert_eq!(info.state, JobState::Waiting);
        let info = queue.job_details(delayed.id).unwrap();
        assert_eq!(info.state, JobState::Delayed);

        let claimed = queue.dequeue(&shutdown).await.unwrap();
        let info = queue.job_details(claimed.id).unwrap();
        assert_eq!(info.state, JobState::Active);

        queue.complete(claimed.id);
        assert!(queue.job_details(claimed.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letter_records_expire_after_ttl() {
        let store = DeadLetterStore::new(Duration::from_secs(60));
        let id = JobId::new();
        store.insert(DeadLetterRecord {
            original_job_id: id,
            original_event_type: "like.added".to_string(),
            original_payload: vec![],
            last_error: "boom".to_string(),
            failed_at: Utc::now(),
        });

        assert!(store.get(id).is_some());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.get(id).is_none());
        assert!(store.take(id).is_none());
    }
}
