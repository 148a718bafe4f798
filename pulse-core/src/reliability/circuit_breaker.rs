//! Circuit breaker guarding calls to failure-prone dependencies.
//!
//! CLOSED -> (failures reach the threshold) -> OPEN -> (reset timeout
//! elapses) -> HALF_OPEN -> CLOSED on the next success, back to OPEN on the
//! next failure. While OPEN, `execute` fails fast with `CircuitOpen` without
//! invoking the wrapped operation.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{PulseError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of the breaker's current state.
#[derive(Clone, Copy, Debug)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Run the guarded operation, short-circuiting while the breaker is
    /// open and the reset window has not elapsed.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.lock().expect("breaker mutex poisoned");
            if inner.state == CircuitState::Open {
                let reset_due = inner
                    .last_failure_at
                    .map(|at| at.elapsed() > self.reset_timeout)
                    .unwrap_or(true);
                if reset_due {
                    inner.state = CircuitState::HalfOpen;
                } else {
                    return Err(PulseError::CircuitOpen);
                }
            }
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold || inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }
}
