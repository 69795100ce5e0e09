//! Monthly referral runner
//!
//! Solves every period in order, derives per-category and per-shelter
//! statistics, and assembles full-history tables of referrals and unsheltered
//! people. Periods share only read-only network parameters, so they can be
//! solved concurrently; results are always reassembled in period order.

use crate::allocation::Violation;
use crate::demand::Demand;
use crate::error::{ReferralError, Result};
use crate::network::{Category, HotspotId, Network, ShelterId};
use crate::solver::{ReferralPlan, SolverOptions, solve};
use serde::Serialize;
use std::collections::BTreeMap;
use trials::{Execution, ParallelRunner, simple_progress_reporter};

/// Tolerance for the post-solve invariant check
const INVARIANT_TOLERANCE: f64 = 1e-6;

/// Periods between progress lines when periods are solved concurrently
const PERIOD_PROGRESS_INTERVAL: usize = 3;

/// One period of input demand
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    /// Label from the input table, e.g. a month number
    pub label: String,
    pub demand: Demand,
}

impl Period {
    pub fn new(label: impl Into<String>, demand: Demand) -> Self {
        Period {
            label: label.into(),
            demand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunnerOptions {
    pub solver: SolverOptions,
    pub execution: Execution,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CategoryStats {
    pub served: f64,
    pub shortfall: f64,
    pub distance: f64,
    /// Distance per served person, 0 when nobody was served
    pub average_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShelterUsage {
    pub shelter: ShelterId,
    pub name: String,
    pub used: f64,
    pub capacity: f64,
    /// used / capacity × 100, 0 for a shelter without beds
    pub utilization_pct: f64,
}

/// Solved plan for one period plus derived statistics
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodResult {
    pub period: usize,
    pub label: String,
    pub plan: ReferralPlan,
    pub categories: BTreeMap<Category, CategoryStats>,
    pub shelters: Vec<ShelterUsage>,
    pub total_served: f64,
    pub total_shortfall: f64,
    pub total_distance: f64,
    pub average_distance: f64,
}

impl PeriodResult {
    pub fn from_plan(period: usize, label: &str, network: &Network, plan: ReferralPlan) -> Self {
        let mut categories: BTreeMap<Category, CategoryStats> = network
            .categories()
            .iter()
            .map(|g| (g.clone(), CategoryStats::default()))
            .collect();

        for flow in &plan.allocation.flows {
            let distance = network.distance(&flow.hotspot, &flow.shelter).unwrap_or(0.0);
            let stats = categories.entry(flow.category.clone()).or_default();
            stats.served += flow.people;
            stats.distance += flow.people * distance;
        }
        for shortfall in &plan.allocation.shortfalls {
            categories.entry(shortfall.category.clone()).or_default().shortfall += shortfall.people;
        }
        for stats in categories.values_mut() {
            stats.average_distance = per_person(stats.distance, stats.served);
        }

        let shelters = network
            .shelters()
            .iter()
            .map(|shelter| {
                let used = plan.allocation.shelter_load(&shelter.id);
                let utilization_pct = if shelter.capacity > 0.0 {
                    used / shelter.capacity * 100.0
                } else {
                    0.0
                };
                ShelterUsage {
                    shelter: shelter.id.clone(),
                    name: shelter.name.clone(),
                    used,
                    capacity: shelter.capacity,
                    utilization_pct,
                }
            })
            .collect();

        let total_served = plan.allocation.total_served();
        PeriodResult {
            period,
            label: label.to_string(),
            categories,
            shelters,
            total_served,
            total_shortfall: plan.total_shortfall,
            total_distance: plan.total_distance,
            average_distance: per_person(plan.total_distance, total_served),
            plan,
        }
    }

    /// Referrals that round to at least one whole person
    pub fn flow_records(&self, network: &Network) -> Vec<FlowRecord> {
        self.plan
            .allocation
            .flows
            .iter()
            .filter_map(|flow| {
                whole_people(flow.people).map(|people| FlowRecord {
                    period: self.period,
                    label: self.label.clone(),
                    hotspot: flow.hotspot.clone(),
                    shelter: flow.shelter.clone(),
                    category: flow.category.clone(),
                    people,
                    distance: network.distance(&flow.hotspot, &flow.shelter).unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// Unsheltered counts that round to at least one whole person
    pub fn shortfall_records(&self) -> Vec<ShortfallRecord> {
        self.plan
            .allocation
            .shortfalls
            .iter()
            .filter_map(|shortfall| {
                whole_people(shortfall.people).map(|people| ShortfallRecord {
                    period: self.period,
                    label: self.label.clone(),
                    hotspot: shortfall.hotspot.clone(),
                    category: shortfall.category.clone(),
                    people,
                })
            })
            .collect()
    }
}

/// Actionable referral: people moved from a hotspot to a shelter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub period: usize,
    pub label: String,
    pub hotspot: HotspotId,
    pub shelter: ShelterId,
    pub category: Category,
    pub people: u64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortfallRecord {
    pub period: usize,
    pub label: String,
    pub hotspot: HotspotId,
    pub category: Category,
    pub people: u64,
}

/// The period that stopped a run
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodFailure {
    pub period: usize,
    pub label: String,
    pub error: ReferralError,
}

/// Results of a (possibly partial) run
///
/// When a period fails, `periods` holds every earlier period and `failure`
/// names the one that stopped the run; later periods are not reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferralRun {
    pub periods: Vec<PeriodResult>,
    pub flows: Vec<FlowRecord>,
    pub shortfalls: Vec<ShortfallRecord>,
    pub failure: Option<PeriodFailure>,
}

impl ReferralRun {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Solve every period and collect statistics and full-history tables
pub fn run_referrals(network: &Network, periods: &[Period], options: &RunnerOptions) -> ReferralRun {
    let solve_period = |index: usize| -> Result<PeriodResult> {
        let period = &periods[index];
        let _span = tracing::info_span!("period", index, label = %period.label).entered();

        let plan = solve(network, &period.demand, &options.solver)?;
        let violations = plan
            .allocation
            .violations(network, &period.demand, INVARIANT_TOLERANCE);
        report_violations(&violations);

        tracing::info!(
            unsheltered = plan.total_shortfall,
            distance = plan.total_distance,
            "period solved"
        );
        Ok(PeriodResult::from_plan(index, &period.label, network, plan))
    };

    let outcomes: Vec<Result<PeriodResult>> = if options.execution.is_parallel() {
        ParallelRunner::new(periods.len(), solve_period)
            .execution(options.execution)
            .progress(simple_progress_reporter(PERIOD_PROGRESS_INTERVAL))
            .run()
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|message| Err(ReferralError::TrialPanicked { index, message }))
            })
            .collect()
    } else {
        let mut outcomes = Vec::with_capacity(periods.len());
        for index in 0..periods.len() {
            let outcome = solve_period(index);
            let failed = outcome.is_err();
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        outcomes
    };

    let mut run = ReferralRun::default();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(result) => {
                run.flows.extend(result.flow_records(network));
                run.shortfalls.extend(result.shortfall_records());
                run.periods.push(result);
            }
            Err(error) => {
                let label = periods[index].label.clone();
                tracing::error!(period = index, %label, %error, "period failed, stopping run");
                run.failure = Some(PeriodFailure {
                    period: index,
                    label,
                    error,
                });
                break;
            }
        }
    }
    run
}

fn report_violations(violations: &[Violation]) {
    for violation in violations {
        tracing::warn!(%violation, "allocation invariant violated");
    }
}

fn per_person(distance: f64, people: f64) -> f64 {
    if people > 0.0 { distance / people } else { 0.0 }
}

/// Round to the nearest person; `None` below one whole person
fn whole_people(value: f64) -> Option<u64> {
    let rounded = value.round();
    (rounded >= 1.0).then_some(rounded as u64)
}
