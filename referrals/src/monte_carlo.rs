//! Monte Carlo evaluation of referral policies under daily demand uncertainty
//!
//! Each simulated day draws per-category arrivals from a Poisson distribution
//! with rate `monthly_total / days_in_month`, then runs every registered policy
//! on that same day, starting from full capacity. Policies are therefore
//! compared on identical demand rather than on independent resamples.
//!
//! Day `i` takes its demand from its own seeded stream and each policy on day
//! `i` gets a further stream keyed by the policy name. Adding, removing or
//! reordering policies never changes the sampled demand, and results are
//! identical whether days run sequentially or in parallel.

use crate::demand::DailyDemand;
use crate::error::{ReferralError, Result};
use crate::heuristics::{Allocator, DayOutcome};
use crate::network::{Category, HotspotId, Network};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use trials::seed::{label_stream, stream_seed};
use trials::{Execution, ParallelRunner, simple_progress_reporter};

const DEMAND_STREAM: u64 = 1;
const POLICY_STREAM: u64 = 2;

/// Total arrivals per category over one month
pub type MonthlyRates = BTreeMap<Category, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloConfig {
    /// Hotspot where sampled arrivals appear
    pub origin: HotspotId,
    pub month_index: usize,
    pub n_days: usize,
    pub days_in_month: u32,
    pub seed: u64,
    pub execution: Execution,
}

impl MonteCarloConfig {
    pub fn new(origin: impl Into<HotspotId>) -> Self {
        MonteCarloConfig {
            origin: origin.into(),
            month_index: 0,
            n_days: 1000,
            days_in_month: 30,
            seed: 123,
            execution: Execution::Sequential,
        }
    }
}

/// One policy's metrics, one entry per simulated day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySeries {
    pub name: String,
    pub sheltered: Vec<u64>,
    pub unsheltered: Vec<u64>,
    pub total_distance: Vec<f64>,
}

impl PolicySeries {
    fn new(name: &str, n_days: usize) -> Self {
        PolicySeries {
            name: name.to_string(),
            sheltered: Vec::with_capacity(n_days),
            unsheltered: Vec::with_capacity(n_days),
            total_distance: Vec::with_capacity(n_days),
        }
    }

    fn push(&mut self, outcome: DayOutcome) {
        self.sheltered.push(outcome.sheltered);
        self.unsheltered.push(outcome.unsheltered);
        self.total_distance.push(outcome.total_distance);
    }

    pub fn summary(&self) -> PolicySummary {
        let as_f64 = |values: &[u64]| values.iter().map(|&v| v as f64).collect::<Vec<_>>();
        PolicySummary {
            name: self.name.clone(),
            sheltered: MetricSummary::from_samples(&as_f64(&self.sheltered)),
            unsheltered: MetricSummary::from_samples(&as_f64(&self.unsheltered)),
            total_distance: MetricSummary::from_samples(&self.total_distance),
        }
    }
}

/// Sampled demand and per-policy outcome distributions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyEvaluation {
    pub sampled_demand: Vec<BTreeMap<Category, u64>>,
    /// In registration order
    pub series: Vec<PolicySeries>,
}

impl PolicyEvaluation {
    pub fn series(&self, name: &str) -> Option<&PolicySeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn summaries(&self) -> Vec<PolicySummary> {
        self.series.iter().map(PolicySeries::summary).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub name: String,
    pub sheltered: MetricSummary,
    pub unsheltered: MetricSummary,
    pub total_distance: MetricSummary,
}

/// Distribution summary of one metric across simulated days
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

impl MetricSummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return MetricSummary::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

        let percentile = |p: f64| {
            let index = ((p / 100.0) * (n - 1.0)).round() as usize;
            sorted[index.min(sorted.len() - 1)]
        };

        MetricSummary {
            mean,
            std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p10: percentile(10.0),
            p50: percentile(50.0),
            p90: percentile(90.0),
        }
    }
}

struct DayResult {
    demand: BTreeMap<Category, u64>,
    outcomes: Vec<DayOutcome>,
}

/// Run every policy on `config.n_days` sampled days of demand
pub fn evaluate_policies(
    network: &Network,
    monthly_rates: &[MonthlyRates],
    allocators: &[Box<dyn Allocator>],
    config: &MonteCarloConfig,
) -> Result<PolicyEvaluation> {
    let samplers = daily_samplers(network, monthly_rates, config)?;

    if !network.has_hotspot(&config.origin) {
        return Err(ReferralError::invalid(format!(
            "origin hotspot {} is not in the network",
            config.origin
        )));
    }
    let mut names = BTreeSet::new();
    for allocator in allocators {
        if !names.insert(allocator.name()) {
            return Err(ReferralError::invalid(format!(
                "policy name {} registered twice",
                allocator.name()
            )));
        }
    }

    tracing::info!(
        days = config.n_days,
        month = config.month_index,
        policies = allocators.len(),
        seed = config.seed,
        "starting Monte Carlo evaluation"
    );

    let simulate_day = |day: usize| {
        let mut demand_rng = StdRng::seed_from_u64(stream_seed(config.seed, DEMAND_STREAM, day as u64));
        let mut arrivals = DailyDemand::new();
        let mut demand = BTreeMap::new();
        for (category, poisson) in &samplers {
            let people = poisson
                .as_ref()
                .map_or(0, |p| p.sample(&mut demand_rng) as u64);
            arrivals.set(config.origin.clone(), category.clone(), people);
            demand.insert(category.clone(), people);
        }

        let policy_seed = stream_seed(config.seed, POLICY_STREAM, day as u64);
        let outcomes = allocators
            .iter()
            .map(|allocator| {
                let seed = stream_seed(policy_seed, label_stream(allocator.name()), 0);
                let mut rng = StdRng::seed_from_u64(seed);
                let outcome = allocator.allocate_day(network, &arrivals, &mut rng);
                debug_assert_eq!(outcome.people(), arrivals.total());
                outcome
            })
            .collect();

        DayResult { demand, outcomes }
    };

    let days = ParallelRunner::new(config.n_days, simulate_day)
        .execution(config.execution)
        .progress(simple_progress_reporter((config.n_days / 10).max(1)))
        .run();

    let mut evaluation = PolicyEvaluation {
        sampled_demand: Vec::with_capacity(config.n_days),
        series: allocators
            .iter()
            .map(|a| PolicySeries::new(a.name(), config.n_days))
            .collect(),
    };
    for (index, day) in days.into_iter().enumerate() {
        let day = day.map_err(|message| ReferralError::TrialPanicked { index, message })?;
        for (series, outcome) in evaluation.series.iter_mut().zip(day.outcomes) {
            series.push(outcome);
        }
        evaluation.sampled_demand.push(day.demand);
    }

    Ok(evaluation)
}

/// Poisson sampler per network category; `None` for a zero daily rate
fn daily_samplers(
    network: &Network,
    monthly_rates: &[MonthlyRates],
    config: &MonteCarloConfig,
) -> Result<Vec<(Category, Option<Poisson<f64>>)>> {
    if config.days_in_month == 0 {
        return Err(ReferralError::SamplingError(
            "days_in_month must be positive".to_string(),
        ));
    }
    let rates = monthly_rates.get(config.month_index).ok_or_else(|| {
        ReferralError::SamplingError(format!(
            "month index {} out of range for {} months of rates",
            config.month_index,
            monthly_rates.len()
        ))
    })?;
    if let Some(unknown) = rates.keys().find(|g| !network.has_category(g)) {
        return Err(ReferralError::SamplingError(format!(
            "rate given for unknown category {unknown}"
        )));
    }

    network
        .categories()
        .iter()
        .map(|category| {
            let monthly = *rates.get(category).ok_or_else(|| {
                ReferralError::SamplingError(format!("no monthly rate for category {category}"))
            })?;
            if !monthly.is_finite() || monthly < 0.0 {
                return Err(ReferralError::SamplingError(format!(
                    "monthly rate for {category} is {monthly}; rates must be non-negative"
                )));
            }

            let lambda = monthly / config.days_in_month as f64;
            if lambda == 0.0 {
                return Ok((category.clone(), None));
            }
            let poisson = Poisson::new(lambda).map_err(|e| {
                ReferralError::SamplingError(format!("daily rate {lambda} for {category}: {e}"))
            })?;
            Ok((category.clone(), Some(poisson)))
        })
        .collect()
}
