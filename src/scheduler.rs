//! Worker pool with unordered completion and serialized reduction.
//!
//! Tasks are embarrassingly parallel; the reduction step is the single
//! serialization point of the engine. Workers send completed results over a
//! channel to the submitting thread, which folds them into the accumulator
//! in arrival order. The accumulator, and every counter inside it, is
//! therefore touched by exactly one thread at a time.
//!
//! Failure policy is fail-fast: the first error cancels submission of
//! pending tasks (already-running tasks drain harmlessly) and is returned to
//! the caller. Nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

/// Error building the worker pool.
#[derive(Debug, thiserror::Error)]
#[error("worker pool construction failed: {0}")]
pub struct PoolBuildError(String);

/// Fixed-size worker pool executing `(task) -> result` closures.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `num_threads` workers; 0 picks the rayon default.
    pub fn new(num_threads: usize) -> Result<Self, PoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| PoolBuildError(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every task on the pool and fold the results into `acc` serially,
    /// in completion order.
    ///
    /// `worker` runs concurrently on pool threads; `fold` runs only on the
    /// calling thread. The fold must be commutative up to the accumulator's
    /// own ordering guarantees, since completion order is arbitrary.
    pub fn map_reduce<T, R, A, E, W, F>(
        &self,
        tasks: Vec<T>,
        worker: W,
        acc: &mut A,
        mut fold: F,
    ) -> Result<(), E>
    where
        T: Send,
        R: Send,
        E: Send,
        W: Fn(T) -> Result<R, E> + Sync,
        F: FnMut(&mut A, R) -> Result<(), E>,
    {
        let cancelled = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Result<R, E>>();
        let mut first_err: Option<E> = None;

        self.pool.in_place_scope(|scope| {
            for task in tasks {
                let tx = tx.clone();
                let cancelled = &cancelled;
                let worker = &worker;
                scope.spawn(move |_| {
                    if cancelled.load(Ordering::Relaxed) {
                        return;
                    }
                    let result = worker(task);
                    if result.is_err() {
                        cancelled.store(true, Ordering::Relaxed);
                    }
                    // Receiver gone means the reducer already failed.
                    let _ = tx.send(result);
                });
            }
            drop(tx);

            for message in rx {
                match message {
                    Ok(result) => {
                        if first_err.is_none() {
                            if let Err(e) = fold(acc, result) {
                                cancelled.store(true, Ordering::Relaxed);
                                first_err = Some(e);
                            }
                        }
                    }
                    Err(e) => {
                        cancelled.store(true, Ordering::Relaxed);
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
            }
        });

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
