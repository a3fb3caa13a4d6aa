//! Bounded worker pool with a per-batch deadline.
//!
//! A [`WorkerPool`] wraps a fixed-size rayon pool. [`WorkerPool::run_batch`]
//! blocks the coordinator until every queued item has reported back or the
//! batch deadline (`items × per_item_timeout`) passes. Work still in flight at
//! the deadline is abandoned, not cancelled: it may finish later, but its
//! results are not collected. Partial completion is a normal outcome.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{DisjointResult, PoolError};

/// Results collected from one batch.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Results in completion order.
    pub results: Vec<T>,
    pub dispatched: usize,
    /// The deadline passed before every item reported back.
    pub timed_out: bool,
}

impl<T> BatchOutcome<T> {
    pub fn abandoned(&self) -> usize {
        self.dispatched - self.results.len()
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    per_item: Duration,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> DisjointResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("disjoint-worker-{i}"))
            .panic_handler(|_| tracing::error!("worker panicked; its result is dropped"))
            .build()
            .map_err(|e| PoolError::Build {
                message: e.to_string(),
            })?;
        Ok(Self {
            pool,
            per_item: Duration::from_millis(config.per_item_timeout_ms),
        })
    }

    /// Run `work` over `items` and wait for completion or the deadline.
    pub fn run_batch<I, T, F>(&self, items: Vec<I>, work: F) -> BatchOutcome<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> T + Send + Sync + 'static,
    {
        let dispatched = items.len();
        let mut results = Vec::with_capacity(dispatched);
        if dispatched == 0 {
            return BatchOutcome {
                results,
                dispatched,
                timed_out: false,
            };
        }

        let (tx, rx) = mpsc::channel();
        let work = Arc::new(work);
        for item in items {
            let tx = tx.clone();
            let work = Arc::clone(&work);
            self.pool.spawn(move || {
                // The coordinator may have stopped listening after a timeout.
                let _ = tx.send(work(item));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.per_item.saturating_mul(dispatched as u32);
        let mut timed_out = false;
        while results.len() < dispatched {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(result) => results.push(result),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                // Every sender is gone: remaining items panicked.
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if timed_out {
            tracing::warn!(
                dispatched,
                completed = results.len(),
                "batch deadline passed; abandoning outstanding work"
            );
        }

        BatchOutcome {
            results,
            dispatched,
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn pool(workers: usize, per_item_timeout_ms: u64) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            workers,
            per_item_timeout_ms,
        })
        .unwrap()
    }

    #[test]
    fn collects_every_result() {
        let outcome = pool(4, 1_000).run_batch((1..=20).collect(), |x: u64| x * x);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.abandoned(), 0);
        let mut results = outcome.results;
        results.sort();
        assert_eq!(results.iter().sum::<u64>(), (1..=20u64).map(|x| x * x).sum::<u64>());
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let outcome = pool(2, 10).run_batch(Vec::<u8>::new(), |x| x);
        assert_eq!(outcome.dispatched, 0);
        assert!(!outcome.timed_out);
    }

    #[test]
    fn slow_items_are_abandoned_at_deadline() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let started = Instant::now();
        let outcome = pool(1, 20).run_batch(vec![0u64, 1, 2], move |i| {
            if i > 0 {
                std::thread::sleep(Duration::from_millis(500));
            }
            counter.fetch_add(1, Ordering::SeqCst);
            i
        });
        assert!(outcome.timed_out);
        assert!(outcome.abandoned() >= 1);
        assert!(started.elapsed() < Duration::from_millis(450));
    }
}
