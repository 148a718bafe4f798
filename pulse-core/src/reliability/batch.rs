//! Chunked batch execution with bounded concurrency and per-item failure
//! isolation. Used for bulk fan-out work (follower feeds, aggregation).

use std::future::Future;

use futures::StreamExt;
use tracing::{debug, warn};

/// Per-item results and errors for one batch run. One item's failure never
/// aborts the rest of the batch.
#[derive(Debug, Default)]
pub struct BatchOutcome<R> {
    pub results: Vec<R>,
    pub errors: Vec<anyhow::Error>,
}

impl<R> BatchOutcome<R> {
    pub fn successful(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BatchExecutor {
    batch_size: usize,
    concurrency: usize,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(10, 5)
    }
}

impl BatchExecutor {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Chunk the input and run each chunk's items concurrently up to the
    /// configured concurrency, collecting successes and failures
    /// independently.
    pub async fn process<T, R, F, Fut>(&self, items: Vec<T>, operation: F) -> BatchOutcome<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let total_batches = items.len().div_ceil(self.batch_size);
        let mut outcome = BatchOutcome {
            results: Vec::with_capacity(items.len()),
            errors: Vec::new(),
        };

        let mut iter = items.into_iter().peekable();
        let mut batch_number = 0usize;
        while iter.peek().is_some() {
            let batch: Vec<T> = iter.by_ref().take(self.batch_size).collect();
            batch_number += 1;

            let settled: Vec<anyhow::Result<R>> =
                futures::stream::iter(batch.into_iter().map(|item| operation(item)))
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await;

            for result in settled {
                match result {
                    Ok(value) => outcome.results.push(value),
                    Err(err) => outcome.errors.push(err),
                }
            }
            debug!(batch = batch_number, total = total_batches, "processed batch");
        }

        if !outcome.errors.is_empty() {
            warn!(errors = outcome.errors.len(), "errors in batch processing");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn partial_failures_do_not_abort_the_batch() {
        let executor = BatchExecutor::new(3, 2);
        let items: Vec<u32> = (0..10).collect();

        let outcome = executor
            .process(items, |n| async move {
                if n % 4 == 0 {
                    anyhow::bail!("item {n} failed")
                }
                Ok(n * 2)
            })
            .await;

        // 0, 4, 8 fail
        assert_eq!(outcome.failed(), 3);
        assert_eq!(outcome.successful(), 7);
        let mut results = outcome.results.clone();
        results.sort_unstable();
        assert_eq!(results, vec![2, 4, 6, 10, 12, 14, 18]);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_cap() {
        let executor = BatchExecutor::new(8, 3);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcome = executor
            .process((0..8).collect(), |_| async {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(outcome.successful(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let executor = BatchExecutor::default();
        let outcome = executor
            .process(Vec::<u32>::new(), |n| async move { Ok(n) })
            .await;
        assert_eq!(outcome.successful(), 0);
        assert_eq!(outcome.failed(), 0);
    }
}
