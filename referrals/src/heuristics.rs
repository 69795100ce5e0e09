//! First-come-first-served referral policies
//!
//! Heuristics place people one at a time: category by category, hotspot by
//! hotspot, person by person, in network order. A bed taken by an earlier
//! person is gone for everyone after them, even on the same day. There is no
//! lookahead and no backtracking; a person with no eligible, reachable shelter
//! with a free bed is simply counted as unsheltered.

use crate::demand::DailyDemand;
use crate::network::{Network, ShelterId};
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

/// Outcome of one policy on one day
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DayOutcome {
    pub sheltered: u64,
    pub unsheltered: u64,
    pub total_distance: f64,
}

impl DayOutcome {
    pub fn people(&self) -> u64 {
        self.sheltered + self.unsheltered
    }
}

/// Remaining whole beds per shelter, indexed like `Network::shelters`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedLedger {
    remaining: Vec<u64>,
}

impl BedLedger {
    /// Every shelter at full capacity
    pub fn full(network: &Network) -> Self {
        BedLedger {
            remaining: network.shelters().iter().map(|s| s.beds()).collect(),
        }
    }

    pub fn remaining(&self, network: &Network, shelter: &ShelterId) -> Option<u64> {
        let index = network.shelters().iter().position(|s| &s.id == shelter)?;
        self.remaining.get(index).copied()
    }

    pub fn total_remaining(&self) -> u64 {
        self.remaining.iter().sum()
    }

    fn has_bed(&self, index: usize) -> bool {
        self.remaining.get(index).is_some_and(|&beds| beds > 0)
    }

    fn take(&mut self, index: usize) {
        if let Some(beds) = self.remaining.get_mut(index) {
            *beds = beds.saturating_sub(1);
        }
    }
}

/// A shelter a person could be sent to right now
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position in `Network::shelters`
    pub index: usize,
    pub shelter: &'a ShelterId,
    pub distance: f64,
}

/// A single-pass referral policy
pub trait Allocator: Send + Sync {
    fn name(&self) -> &str;

    /// Pick one of the (non-empty) candidates for the next person
    fn pick(&self, candidates: &[Candidate<'_>], rng: &mut StdRng) -> usize;

    /// Place one day's arrivals, consuming beds from `ledger`
    fn allocate(
        &self,
        network: &Network,
        demand: &DailyDemand,
        ledger: &mut BedLedger,
        rng: &mut StdRng,
    ) -> DayOutcome {
        let mut outcome = DayOutcome::default();

        for category in network.categories() {
            for hotspot in network.hotspots() {
                let arrivals = demand.get(hotspot, category);
                if arrivals == 0 {
                    continue;
                }

                let options: Vec<Candidate<'_>> = network
                    .shelters()
                    .iter()
                    .enumerate()
                    .filter(|(_, shelter)| shelter.accepts(category))
                    .filter_map(|(index, shelter)| {
                        network.distance(hotspot, &shelter.id).map(|distance| Candidate {
                            index,
                            shelter: &shelter.id,
                            distance,
                        })
                    })
                    .collect();

                for _ in 0..arrivals {
                    let open: Vec<Candidate<'_>> = options
                        .iter()
                        .filter(|c| ledger.has_bed(c.index))
                        .copied()
                        .collect();
                    if open.is_empty() {
                        outcome.unsheltered += 1;
                        continue;
                    }

                    let chosen = open[self.pick(&open, rng)];
                    ledger.take(chosen.index);
                    outcome.sheltered += 1;
                    outcome.total_distance += chosen.distance;
                }
            }
        }

        outcome
    }

    /// Place one day's arrivals starting from full capacity
    fn allocate_day(&self, network: &Network, demand: &DailyDemand, rng: &mut StdRng) -> DayOutcome {
        let mut ledger = BedLedger::full(network);
        self.allocate(network, demand, &mut ledger, rng)
    }
}

/// Uniformly random choice among feasible shelters
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformRandom;

impl Allocator for UniformRandom {
    fn name(&self) -> &str {
        "random"
    }

    fn pick(&self, candidates: &[Candidate<'_>], rng: &mut StdRng) -> usize {
        rng.random_range(0..candidates.len())
    }
}

/// Closest feasible shelter; ties go to the smallest shelter id
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestGreedy;

impl Allocator for NearestGreedy {
    fn name(&self) -> &str {
        "nearest"
    }

    fn pick(&self, candidates: &[Candidate<'_>], _rng: &mut StdRng) -> usize {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| a.shelter.cmp(b.shelter))
            })
            .map(|(position, _)| position)
            .unwrap_or(0)
    }
}

/// Look up a built-in policy by its name
pub fn allocator_by_name(name: &str) -> Option<Box<dyn Allocator>> {
    match name {
        "random" => Some(Box::new(UniformRandom)),
        "nearest" => Some(Box::new(NearestGreedy)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Shelter;
    use rand::SeedableRng;

    fn near_and_far() -> Network {
        Network::builder()
            .hotspot("A")
            .category("men")
            .shelter(Shelter::new("X", 1.0).eligible_for(["men"]))
            .shelter(Shelter::new("Z", 5.0).eligible_for(["men"]))
            .distance("A", "X", 1.0)
            .distance("A", "Z", 3.0)
            .build()
            .unwrap()
    }

    #[test]
    fn nearest_spills_over_when_closest_is_full() {
        let network = near_and_far();
        let demand = DailyDemand::new().with("A", "men", 2);
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = NearestGreedy.allocate_day(&network, &demand, &mut rng);

        assert_eq!(outcome.sheltered, 2);
        assert_eq!(outcome.unsheltered, 0);
        assert_eq!(outcome.total_distance, 4.0);
    }

    #[test]
    fn nearest_breaks_ties_by_shelter_id() {
        let network = Network::builder()
            .hotspot("A")
            .category("women")
            .shelter(Shelter::new("b-house", 1.0).eligible_for(["women"]))
            .shelter(Shelter::new("a-house", 1.0).eligible_for(["women"]))
            .distance("A", "b-house", 2.0)
            .distance("A", "a-house", 2.0)
            .build()
            .unwrap();
        let demand = DailyDemand::new().with("A", "women", 1);
        let mut ledger = BedLedger::full(&network);
        let mut rng = StdRng::seed_from_u64(1);

        NearestGreedy.allocate(&network, &demand, &mut ledger, &mut rng);

        assert_eq!(ledger.remaining(&network, &"a-house".into()), Some(0));
        assert_eq!(ledger.remaining(&network, &"b-house".into()), Some(1));
    }

    #[test]
    fn ineligible_and_unreachable_shelters_are_never_used() {
        let network = Network::builder()
            .hotspot("A")
            .hotspot("B")
            .category("men")
            .category("women")
            .shelter(Shelter::new("X", 10.0).eligible_for(["men"]))
            .shelter(Shelter::new("Y", 10.0).eligible_for(["women"]))
            .distance("A", "X", 1.0)
            .distance("B", "Y", 1.0)
            .build()
            .unwrap();
        let demand = DailyDemand::new()
            .with("A", "women", 3)
            .with("B", "men", 2)
            .with("A", "men", 1);
        let mut rng = StdRng::seed_from_u64(7);

        for allocator in [allocator_by_name("random").unwrap(), allocator_by_name("nearest").unwrap()] {
            let outcome = allocator.allocate_day(&network, &demand, &mut rng);
            assert_eq!(outcome.sheltered, 1, "{}", allocator.name());
            assert_eq!(outcome.unsheltered, 5, "{}", allocator.name());
        }
    }

    #[test]
    fn random_conserves_people_and_respects_capacity() {
        let network = near_and_far();
        let demand = DailyDemand::new().with("A", "men", 9);

        for seed in 0..20 {
            let mut ledger = BedLedger::full(&network);
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = UniformRandom.allocate(&network, &demand, &mut ledger, &mut rng);

            assert_eq!(outcome.people(), demand.total());
            assert_eq!(outcome.sheltered, 6);
            assert_eq!(ledger.total_remaining(), 0);
            // X at 1 and Z at 3 per person: 1 + 5*3 whichever order beds go
            assert_eq!(outcome.total_distance, 16.0);
        }
    }

    #[test]
    fn ledger_carries_over_between_calls() {
        let network = near_and_far();
        let mut ledger = BedLedger::full(&network);
        let mut rng = StdRng::seed_from_u64(3);

        let first = NearestGreedy.allocate(&network, &DailyDemand::new().with("A", "men", 4), &mut ledger, &mut rng);
        let second = NearestGreedy.allocate(&network, &DailyDemand::new().with("A", "men", 4), &mut ledger, &mut rng);

        assert_eq!(first.sheltered, 4);
        assert_eq!(second.sheltered, 2);
        assert_eq!(second.unsheltered, 2);
    }

    #[test]
    fn unknown_policy_name() {
        assert!(allocator_by_name("optimal").is_none());
    }
}
