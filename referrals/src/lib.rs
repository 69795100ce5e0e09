//! Shelter referral optimization
//!
//! Given where people experiencing homelessness are found (hotspots), which
//! shelters can take which groups (categories), how many beds each shelter has
//! and how far apart everything is, decide how many people of each group to
//! refer from each hotspot to each shelter.
//!
//! - [`solver`]: lexicographic two-stage model. First house as many people as
//!   possible, per category; then, without giving any of that back, minimise
//!   total travel distance.
//! - [`runner`]: solves a sequence of monthly periods and assembles
//!   full-history referral and unsheltered tables.
//! - [`heuristics`] and [`monte_carlo`]: single-pass first-come-first-served
//!   policies evaluated on Poisson-sampled daily demand.
//! - [`tables`], [`config`] and [`output`]: CSV input, TOML experiments and
//!   CSV/JSON export for the two binaries.

pub mod allocation;
pub mod config;
pub mod demand;
pub mod error;
pub mod heuristics;
pub mod monte_carlo;
pub mod network;
pub mod output;
pub mod runner;
pub mod solver;
pub mod tables;
pub mod telemetry;

pub use allocation::{Allocation, Flow, Shortfall, Violation};
pub use demand::{DailyDemand, Demand};
pub use error::{ReferralError, Result};
pub use heuristics::{Allocator, BedLedger, DayOutcome, NearestGreedy, UniformRandom, allocator_by_name};
pub use monte_carlo::{MetricSummary, MonteCarloConfig, MonthlyRates, PolicyEvaluation, evaluate_policies};
pub use network::{Category, HotspotId, Network, NetworkBuilder, Shelter, ShelterId};
pub use runner::{Period, PeriodResult, ReferralRun, RunnerOptions, run_referrals};
pub use solver::{ReferralPlan, SolverOptions, VariableDomain, solve};
pub use trials::Execution;
