//! Two-stage lexicographic referral solver
//!
//! Stage one minimises the number of people left unsheltered. Stage two keeps
//! each category's unsheltered total at its stage-one optimum and minimises
//! total distance-weighted flow. The two passes are separate optimisations
//! over the same variables and constraints; no weighted-sum objective is used.
//!
//! Variables exist only for reachable (hotspot, shelter) pairs and only for
//! categories the shelter is eligible for, so the reachability and eligibility
//! invariants hold by construction.

use crate::allocation::{Allocation, Flow, Shortfall};
use crate::demand::Demand;
use crate::error::{ReferralError, Result};
use crate::network::{Category, Network};
use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    VariableDefinition, default_solver, variable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Domain of the decision variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableDomain {
    /// Continuous flows and shortfalls (LP relaxation)
    Continuous,
    /// Integer flows and shortfalls
    #[default]
    Integer,
    /// Integer flows, continuous shortfalls
    Mixed,
}

impl VariableDomain {
    fn flow_variable(self) -> VariableDefinition {
        match self {
            VariableDomain::Continuous => variable().min(0.0),
            VariableDomain::Integer | VariableDomain::Mixed => variable().integer().min(0.0),
        }
    }

    fn shortfall_variable(self) -> VariableDefinition {
        match self {
            VariableDomain::Integer => variable().integer().min(0.0),
            VariableDomain::Continuous | VariableDomain::Mixed => variable().min(0.0),
        }
    }

    fn integral_flows(self) -> bool {
        self != VariableDomain::Continuous
    }

    fn integral_shortfalls(self) -> bool {
        self == VariableDomain::Integer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverOptions {
    pub domain: VariableDomain,
    /// Work budget, checked after each stage
    ///
    /// The optimizer cannot be interrupted mid-stage, so a stage that starts
    /// within budget runs to completion before the overrun is reported.
    pub time_limit: Option<Duration>,
}

impl SolverOptions {
    pub fn continuous() -> Self {
        SolverOptions {
            domain: VariableDomain::Continuous,
            ..SolverOptions::default()
        }
    }

    pub fn integer() -> Self {
        SolverOptions {
            domain: VariableDomain::Integer,
            ..SolverOptions::default()
        }
    }
}

/// Stage-one optimum: unsheltered people, in total and per category
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StageOneBound {
    pub total: f64,
    pub by_category: BTreeMap<Category, f64>,
}

/// Lexicographically optimal referral plan for one period
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralPlan {
    /// Non-zero flows and every (hotspot, category) shortfall
    pub allocation: Allocation,
    pub stage_one: StageOneBound,
    pub total_shortfall: f64,
    pub total_distance: f64,
}

/// Solve one period's referral problem
///
/// Fails with `InvalidInput` before building any model when demand is
/// incomplete or malformed, or fractional under integer variables.
pub fn solve(network: &Network, demand: &Demand, options: &SolverOptions) -> Result<ReferralPlan> {
    demand.validate(network)?;
    if options.domain == VariableDomain::Integer {
        require_whole_people(network, demand)?;
    }

    let started = Instant::now();
    let model = Model::new(network, demand);
    if model.shortfalls.is_empty() {
        return Ok(ReferralPlan {
            allocation: Allocation::default(),
            stage_one: StageOneBound::default(),
            total_shortfall: 0.0,
            total_distance: 0.0,
        });
    }

    let first = model.solve_stage(Stage::Shortfall, options.domain)?;
    let stage_one = model.stage_one_bound(&first, options.domain);
    tracing::debug!(
        shortfall = stage_one.total,
        flows = model.flows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage one solved"
    );

    check_budget(options.time_limit, started.elapsed(), "one", stage_one.total)?;

    let targets: Vec<f64> = network
        .categories()
        .iter()
        .map(|g| stage_one.by_category.get(g).copied().unwrap_or(0.0))
        .collect();
    let second = model
        .solve_stage(Stage::Distance { targets: &targets }, options.domain)
        .map_err(|err| match err {
            ReferralError::InfeasibleInput(_) => ReferralError::SolverFailure {
                detail: "stage two rejected the stage-one shortfall totals".to_string(),
                shortfall_bound: Some(stage_one.total),
            },
            other => other,
        })?;
    check_budget(options.time_limit, started.elapsed(), "two", stage_one.total)?;

    let allocation = model.allocation(&second);
    let total_shortfall = allocation.total_shortfall();
    let total_distance = allocation.total_distance(network);
    tracing::debug!(
        shortfall = total_shortfall,
        distance = total_distance,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage two solved"
    );

    Ok(ReferralPlan {
        allocation,
        stage_one,
        total_shortfall,
        total_distance,
    })
}

/// Integer variables cannot absorb a fractional head count
fn require_whole_people(network: &Network, demand: &Demand) -> Result<()> {
    for hotspot in network.hotspots() {
        for category in network.categories() {
            let people = demand.people(hotspot, category);
            if people.fract() != 0.0 {
                return Err(ReferralError::invalid(format!(
                    "demand for hotspot {hotspot}, category {category} is {people}; \
                     integer variables need whole people"
                )));
            }
        }
    }
    Ok(())
}

fn check_budget(limit: Option<Duration>, elapsed: Duration, stage: &str, shortfall_bound: f64) -> Result<()> {
    match limit {
        Some(limit) if elapsed > limit => Err(ReferralError::SolverFailure {
            detail: format!(
                "time budget of {:.1}s exhausted after stage {stage}",
                limit.as_secs_f64()
            ),
            shortfall_bound: Some(shortfall_bound),
        }),
        _ => Ok(()),
    }
}

enum Stage<'t> {
    Shortfall,
    /// Per-category shortfall targets, indexed like `Network::categories`
    Distance { targets: &'t [f64] },
}

struct FlowKey {
    hotspot: usize,
    shelter: usize,
    category: usize,
    distance: f64,
}

struct ShortfallKey {
    hotspot: usize,
    category: usize,
}

/// Conservation row for one (hotspot, category)
struct Conservation {
    flows: Vec<usize>,
    shortfall: usize,
    demand: f64,
}

struct StageValues {
    flows: Vec<f64>,
    shortfalls: Vec<f64>,
}

/// Index form of the constraint structure, shared by both stages
struct Model<'a> {
    network: &'a Network,
    flows: Vec<FlowKey>,
    shortfalls: Vec<ShortfallKey>,
    conservation: Vec<Conservation>,
    /// (capacity, flow indices) per shelter that can receive anyone
    capacity: Vec<(f64, Vec<usize>)>,
    /// Shortfall indices per category
    by_category: Vec<Vec<usize>>,
}

impl<'a> Model<'a> {
    fn new(network: &'a Network, demand: &Demand) -> Self {
        let categories = network.categories();
        let mut flows = Vec::new();
        let mut shortfalls = Vec::new();
        let mut conservation = Vec::new();
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); network.shelters().len()];
        let mut by_category: Vec<Vec<usize>> = vec![Vec::new(); categories.len()];

        for (h, hotspot) in network.hotspots().iter().enumerate() {
            for (g, category) in categories.iter().enumerate() {
                let mut row = Vec::new();
                for (s, shelter) in network.shelters().iter().enumerate() {
                    if !shelter.accepts(category) {
                        continue;
                    }
                    let Some(distance) = network.distance(hotspot, &shelter.id) else {
                        continue;
                    };
                    row.push(flows.len());
                    incoming[s].push(flows.len());
                    flows.push(FlowKey {
                        hotspot: h,
                        shelter: s,
                        category: g,
                        distance,
                    });
                }

                by_category[g].push(shortfalls.len());
                conservation.push(Conservation {
                    flows: row,
                    shortfall: shortfalls.len(),
                    demand: demand.people(hotspot, category),
                });
                shortfalls.push(ShortfallKey {
                    hotspot: h,
                    category: g,
                });
            }
        }

        let capacity = network
            .shelters()
            .iter()
            .zip(incoming)
            .filter(|(_, flows)| !flows.is_empty())
            .map(|(shelter, flows)| (shelter.capacity, flows))
            .collect();

        Model {
            network,
            flows,
            shortfalls,
            conservation,
            capacity,
            by_category,
        }
    }

    fn solve_stage(&self, stage: Stage<'_>, domain: VariableDomain) -> Result<StageValues> {
        let mut vars = ProblemVariables::new();
        let flow_vars: Vec<Variable> = self
            .flows
            .iter()
            .map(|_| vars.add(domain.flow_variable()))
            .collect();
        let shortfall_vars: Vec<Variable> = self
            .shortfalls
            .iter()
            .map(|_| vars.add(domain.shortfall_variable()))
            .collect();

        let mut objective = Expression::default();
        match stage {
            Stage::Shortfall => {
                for z in &shortfall_vars {
                    objective.add_mul(1.0, *z);
                }
            }
            Stage::Distance { .. } => {
                for (key, x) in self.flows.iter().zip(&flow_vars) {
                    objective.add_mul(key.distance, *x);
                }
            }
        }

        let mut problem = vars.minimise(objective).using(default_solver);

        for row in &self.conservation {
            let mut placed = Expression::default();
            for &f in &row.flows {
                placed.add_mul(1.0, flow_vars[f]);
            }
            placed.add_mul(1.0, shortfall_vars[row.shortfall]);
            problem = problem.with(placed.eq(row.demand));
        }

        for (capacity, incoming) in &self.capacity {
            let mut load = Expression::default();
            for &f in incoming {
                load.add_mul(1.0, flow_vars[f]);
            }
            problem = problem.with(load.leq(*capacity));
        }

        if let Stage::Distance { targets } = stage {
            for (members, target) in self.by_category.iter().zip(targets) {
                let mut unsheltered = Expression::default();
                for &z in members {
                    unsheltered.add_mul(1.0, shortfall_vars[z]);
                }
                problem = problem.with(unsheltered.eq(*target));
            }
        }

        let solution = problem.solve().map_err(resolution_error)?;

        let settle = |value: f64, integral: bool| {
            let value = value.max(0.0);
            if integral { value.round() } else { value }
        };
        Ok(StageValues {
            flows: flow_vars
                .iter()
                .map(|x| settle(solution.value(*x), domain.integral_flows()))
                .collect(),
            shortfalls: shortfall_vars
                .iter()
                .map(|z| settle(solution.value(*z), domain.integral_shortfalls()))
                .collect(),
        })
    }

    fn stage_one_bound(&self, values: &StageValues, domain: VariableDomain) -> StageOneBound {
        let mut by_category = BTreeMap::new();
        for (category, members) in self.network.categories().iter().zip(&self.by_category) {
            let total: f64 = members.iter().map(|&z| values.shortfalls[z]).sum();
            let total = if domain.integral_shortfalls() {
                total.round()
            } else {
                total
            };
            by_category.insert(category.clone(), total);
        }
        StageOneBound {
            total: by_category.values().sum(),
            by_category,
        }
    }

    fn allocation(&self, values: &StageValues) -> Allocation {
        let hotspots = self.network.hotspots();
        let shelters = self.network.shelters();
        let categories = self.network.categories();

        let flows = self
            .flows
            .iter()
            .zip(&values.flows)
            .filter(|(_, people)| **people > 0.0)
            .map(|(key, people)| Flow {
                hotspot: hotspots[key.hotspot].clone(),
                shelter: shelters[key.shelter].id.clone(),
                category: categories[key.category].clone(),
                people: *people,
            })
            .collect();

        let shortfalls = self
            .shortfalls
            .iter()
            .zip(&values.shortfalls)
            .map(|(key, people)| Shortfall {
                hotspot: hotspots[key.hotspot].clone(),
                category: categories[key.category].clone(),
                people: *people,
            })
            .collect();

        Allocation { flows, shortfalls }
    }
}

fn resolution_error(error: ResolutionError) -> ReferralError {
    match error {
        ResolutionError::Infeasible => ReferralError::InfeasibleInput(
            "constraints admit no allocation even with unlimited shortfall".to_string(),
        ),
        other => ReferralError::solver_failure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Shelter;
    use approx::assert_abs_diff_eq;

    fn men_women(x_capacity: f64) -> Network {
        Network::builder()
            .hotspot("A")
            .hotspot("B")
            .category("men")
            .category("women")
            .shelter(Shelter::new("X", x_capacity).eligible_for(["men"]))
            .shelter(Shelter::new("Y", 1.0).eligible_for(["women"]))
            .distance("A", "X", 1.0)
            .distance("A", "Y", 2.0)
            .build()
            .unwrap()
    }

    fn one_man_one_woman() -> Demand {
        Demand::new()
            .with("A", "men", 1.0)
            .with("A", "women", 1.0)
            .with("B", "men", 0.0)
            .with("B", "women", 0.0)
    }

    #[test]
    fn everyone_served_when_beds_match() {
        let network = men_women(1.0);
        let plan = solve(&network, &one_man_one_woman(), &SolverOptions::integer()).unwrap();

        assert_abs_diff_eq!(plan.total_shortfall, 0.0);
        assert_abs_diff_eq!(plan.total_distance, 3.0, epsilon = 1e-6);
        let a = "A".into();
        assert_abs_diff_eq!(plan.allocation.flow(&a, &"X".into(), &"men".into()), 1.0);
        assert_abs_diff_eq!(plan.allocation.flow(&a, &"Y".into(), &"women".into()), 1.0);
    }

    #[test]
    fn closed_shelter_leaves_man_unsheltered() {
        let network = men_women(0.0);
        let plan = solve(&network, &one_man_one_woman(), &SolverOptions::continuous()).unwrap();

        assert_abs_diff_eq!(plan.allocation.shortfall(&"A".into(), &"men".into()), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(plan.total_distance, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(plan.stage_one.by_category[&Category::from("women")], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn incomplete_demand_fails_before_solving() {
        let network = men_women(1.0);
        let demand = Demand::new().with("A", "men", 1.0);

        let err = solve(&network, &demand, &SolverOptions::default()).unwrap_err();
        assert!(matches!(err, ReferralError::InvalidInput(_)));
    }

    #[test]
    fn ineligible_and_unreachable_pairs_get_no_variables() {
        let network = men_women(1.0);
        let model = Model::new(&network, &one_man_one_woman());

        // A->X men and A->Y women only
        assert_eq!(model.flows.len(), 2);
        assert_eq!(model.shortfalls.len(), 4);
        assert_eq!(model.capacity.len(), 2);
    }

    #[test]
    fn zero_time_budget_reports_stage_one_bound() {
        let network = men_women(0.0);
        let options = SolverOptions {
            domain: VariableDomain::Continuous,
            time_limit: Some(Duration::ZERO),
        };

        match solve(&network, &one_man_one_woman(), &options) {
            Err(ReferralError::SolverFailure {
                shortfall_bound: Some(bound),
                ..
            }) => assert_abs_diff_eq!(bound, 1.0, epsilon = 1e-6),
            // A stage-one solve faster than the clock resolution still counts
            // as within budget
            Ok(plan) => assert_abs_diff_eq!(plan.total_shortfall, 1.0, epsilon = 1e-6),
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn continuous_stage_two_gives_back_no_shortfall() {
        for (x_capacity, distance) in [(1.0, 3.0), (0.0, 2.0)] {
            let network = men_women(x_capacity);
            let plan = solve(&network, &one_man_one_woman(), &SolverOptions::continuous()).unwrap();

            assert!((plan.total_shortfall - plan.stage_one.total).abs() < 1e-9);
            assert_abs_diff_eq!(plan.total_distance, distance, epsilon = 1e-9);
        }
    }

    #[test]
    fn fractional_demand_needs_continuous_variables() {
        let network = men_women(3.0);
        let demand = one_man_one_woman().with("A", "men", 2.5);

        match solve(&network, &demand, &SolverOptions::integer()) {
            Err(ReferralError::InvalidInput(message)) => {
                assert!(message.contains("hotspot A, category men"), "{message}")
            }
            other => panic!("expected invalid input, got {other:?}"),
        }

        let plan = solve(&network, &demand, &SolverOptions::continuous()).unwrap();
        assert_abs_diff_eq!(plan.total_shortfall, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(plan.allocation.flow(&"A".into(), &"X".into(), &"men".into()), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn budget_is_checked_after_either_stage() {
        let limit = Some(Duration::from_millis(50));

        assert!(check_budget(limit, Duration::from_millis(10), "two", 3.0).is_ok());
        assert!(check_budget(None, Duration::from_secs(3600), "two", 3.0).is_ok());
        match check_budget(limit, Duration::from_millis(80), "two", 3.0) {
            Err(ReferralError::SolverFailure {
                detail,
                shortfall_bound,
            }) => {
                assert!(detail.ends_with("after stage two"), "{detail}");
                assert_eq!(shortfall_bound, Some(3.0));
            }
            other => panic!("expected solver failure, got {other:?}"),
        }
    }

    #[test]
    fn network_without_hotspots_is_trivially_solved() {
        let network = Network::builder()
            .category("men")
            .shelter(Shelter::new("X", 1.0).eligible_for(["men"]))
            .build()
            .unwrap();

        let plan = solve(&network, &Demand::new(), &SolverOptions::default()).unwrap();
        assert!(plan.allocation.flows.is_empty());
        assert_eq!(plan.total_shortfall, 0.0);
    }
}
