//! Queued-work records derived from published events.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for queued jobs. Doubles as the idempotency key when
/// supplied by the caller at publish time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job currently sits in its queue's state machine.
///
/// A job awaiting a retry is `Delayed`, not failed; the `failed` stat on a
/// queue counts terminal failures (dead-letter moves) only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    DeadLetter,
}

/// One unit of queued work. Owned exclusively by its queue until a worker
/// claims it under a lease; destroyed on success, dead-lettered after the
/// retry budget is spent.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub priority: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Lightweight summary returned to producers after a successful publish.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobHandle {
    pub job_id: JobId,
    pub queue: String,
    pub event_type: String,
    pub priority: u8,
}

/// Read-only snapshot of a job for introspection endpoints.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobInfo {
    pub id: JobId,
    pub queue: String,
    pub event_type: String,
    pub state: JobState,
    pub priority: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Record kept for a job that exhausted its retry budget. Retained until
/// manually replayed or TTL-expired.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeadLetterRecord {
    pub original_job_id: JobId,
    pub original_event_type: String,
    pub original_payload: Vec<u8>,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Per-queue counters exposed by the bus's stats endpoint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueStats {
    pub active: u64,
    pub waiting: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }
}
