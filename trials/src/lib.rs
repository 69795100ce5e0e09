//! Independent indexed jobs: ordered execution and reproducible seeding
//!
//! Both the monthly referral runner and the Monte Carlo evaluator break their
//! work into jobs addressed by an index (a period, a simulated day). This crate
//! runs such jobs sequentially or on a rayon pool and always hands results back
//! in index order, so callers observe the same output either way.

pub mod parallel;
pub mod seed;

pub use parallel::{ParallelRunner, simple_progress_reporter};

/// How a batch of independent jobs is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// One job after another on the calling thread
    #[default]
    Sequential,
    /// Rayon work stealing; `threads: None` uses the global pool
    Parallel { threads: Option<usize> },
}

impl Execution {
    pub fn parallel() -> Self {
        Execution::Parallel { threads: None }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Execution::Parallel { .. })
    }
}
