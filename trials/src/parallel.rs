//! Running independent indexed jobs, sequentially or in parallel
//!
//! A job is any `Fn(usize) -> R` closure. The runner calls it once per index in
//! `0..num_jobs` and returns the results in index order, whatever order the
//! jobs actually finished in.
//!
//! # Example: solving twelve months concurrently
//!
//! ```rust
//! use trials::parallel::{ParallelRunner, simple_progress_reporter};
//! use trials::Execution;
//!
//! let results = ParallelRunner::new(12, |month| month * 10)
//!     .execution(Execution::Parallel { threads: Some(4) })
//!     .progress(simple_progress_reporter(6))
//!     .run();
//!
//! for (month, result) in results.iter().enumerate() {
//!     assert_eq!(result.as_ref().copied(), Ok(month * 10));
//! }
//! ```
//!
//! # Determinism
//!
//! Results are deterministic when:
//! 1. The job derives any randomness from its index (see [`crate::seed`])
//! 2. Shared inputs are read-only
//! 3. Each job owns its mutable state (capacity ledgers, solver models)
//!
//! Running the same batch twice produces identical results regardless of
//! execution order or thread count.
//!
//! # Error Handling
//!
//! Panics in individual jobs are caught and returned as `Err(String)`.
//! Other jobs continue executing normally.

use crate::Execution;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Executes a batch of indexed jobs and collects their results in order
///
/// Generic over:
/// - `R`: job result type
/// - `F`: job function type, called with the job index
///
/// # Example
///
/// ```rust
/// use trials::parallel::ParallelRunner;
///
/// let results = ParallelRunner::new(50, |index| index as u64 * 2)
///     .num_threads(4)
///     .run();
///
/// assert_eq!(results.len(), 50);
/// assert_eq!(results[7], Ok(14));
/// ```
pub struct ParallelRunner<R, F>
where
    F: Fn(usize) -> R + Send + Sync,
    R: Send,
{
    num_jobs: usize,
    job: F,
    execution: Execution,
    progress_callback: Option<ProgressCallback>,
}

impl<R, F> ParallelRunner<R, F>
where
    F: Fn(usize) -> R + Send + Sync,
    R: Send,
{
    /// Create a runner for `num_jobs` jobs
    ///
    /// Jobs run in parallel on rayon's global pool unless
    /// [`execution`](Self::execution) says otherwise.
    pub fn new(num_jobs: usize, job: F) -> Self {
        ParallelRunner {
            num_jobs,
            job,
            execution: Execution::parallel(),
            progress_callback: None,
        }
    }

    /// Choose sequential or parallel scheduling
    pub fn execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Run in parallel on a dedicated pool of `n` threads
    pub fn num_threads(mut self, n: usize) -> Self {
        self.execution = Execution::Parallel { threads: Some(n) };
        self
    }

    /// Set progress callback (called after each job completes)
    ///
    /// The callback receives `(completed_count, total_count)`.
    pub fn progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Execute all jobs and return results in index order
    ///
    /// - `Ok(R)` for jobs that returned
    /// - `Err(String)` for jobs that panicked
    pub fn run(self) -> Vec<Result<R, String>> {
        let progress_counter = AtomicUsize::new(0);

        let run_one = |index: usize| {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.job)(index)));

            let completed = progress_counter.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref callback) = self.progress_callback {
                callback(completed, self.num_jobs);
            }

            result.map_err(|panic| {
                if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                }
            })
        };

        match self.execution {
            Execution::Sequential => (0..self.num_jobs).map(run_one).collect(),
            Execution::Parallel { threads } => {
                let execute = || -> Vec<Result<R, String>> {
                    (0..self.num_jobs).into_par_iter().map(run_one).collect()
                };

                let pool = threads.and_then(|n| {
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| {
                            tracing::warn!(threads = n, error = %e, "falling back to global rayon pool")
                        })
                        .ok()
                });

                match pool {
                    Some(pool) => pool.install(execute),
                    None => execute(),
                }
            }
        }
    }
}

/// Progress callback that logs every `interval` completed jobs
pub fn simple_progress_reporter(interval: usize) -> impl Fn(usize, usize) + Send + Sync {
    let interval = interval.max(1);
    move |completed, total| {
        if completed % interval == 0 || completed == total {
            tracing::info!(completed, total, "jobs completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tally {
        index: usize,
        count: usize,
    }

    fn tally(index: usize) -> Tally {
        Tally { index, count: 10 }
    }

    #[test]
    fn test_parallel_basic() {
        let results = ParallelRunner::new(10, tally).run();

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            let stats = result.as_ref().unwrap();
            assert_eq!(stats.index, i);
            assert_eq!(stats.count, 10);
        }
    }

    #[test]
    fn test_parallel_determinism() {
        let run1 = ParallelRunner::new(20, tally).run();
        let run2 = ParallelRunner::new(20, tally).num_threads(2).run();

        assert_eq!(run1, run2);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let job = |i: usize| (i * 31) % 17;
        let sequential = ParallelRunner::new(64, job)
            .execution(Execution::Sequential)
            .run();
        let parallel = ParallelRunner::new(64, job).num_threads(3).run();

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_parallel_panic_isolation() {
        let results = ParallelRunner::new(10, |i| {
            if i == 5 {
                panic!("Test panic");
            }
            tally(i)
        })
        .run();

        assert_eq!(results.len(), 10);
        assert_eq!(results[5], Err("Test panic".to_string()));
        for (i, result) in results.iter().enumerate() {
            if i != 5 {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn test_sequential_panic_isolation() {
        let results = ParallelRunner::new(4, |i| {
            if i == 1 {
                panic!("period {} exploded", i);
            }
            i
        })
        .execution(Execution::Sequential)
        .run();

        assert_eq!(results[1], Err("period 1 exploded".to_string()));
        assert_eq!(results[3], Ok(3));
    }

    #[test]
    fn test_parallel_progress_callback() {
        use std::sync::Mutex;
        let completed = Arc::new(Mutex::new(0));
        let completed_clone = completed.clone();

        ParallelRunner::new(5, tally)
            .progress(move |count, _total| {
                let mut seen = completed_clone.lock().unwrap();
                *seen = (*seen).max(count);
            })
            .run();

        assert_eq!(*completed.lock().unwrap(), 5);
    }

    #[test]
    fn test_simple_progress_reporter() {
        let reporter = simple_progress_reporter(10);
        reporter(10, 100);
        reporter(100, 100);

        // Usable as a runner callback; a zero interval still reports
        let results = ParallelRunner::new(7, tally)
            .progress(simple_progress_reporter(0))
            .run();
        assert_eq!(results.len(), 7);
    }

    #[test]
    fn test_empty_batch() {
        let results = ParallelRunner::new(0, tally).run();
        assert!(results.is_empty());
    }
}
