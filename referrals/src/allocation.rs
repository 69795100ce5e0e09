//! Referral plans: flows from hotspots to shelters plus unmet demand

use crate::demand::Demand;
use crate::network::{Category, HotspotId, Network, ShelterId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// People referred from one hotspot to one shelter in one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flow {
    pub hotspot: HotspotId,
    pub shelter: ShelterId,
    pub category: Category,
    pub people: f64,
}

/// People of one category left unsheltered at one hotspot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shortfall {
    pub hotspot: HotspotId,
    pub category: Category,
    pub people: f64,
}

/// One period's allocation
///
/// Built fresh by the solver for each period and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub flows: Vec<Flow>,
    pub shortfalls: Vec<Shortfall>,
}

impl Allocation {
    pub fn flow(&self, hotspot: &HotspotId, shelter: &ShelterId, category: &Category) -> f64 {
        self.flows
            .iter()
            .filter(|f| &f.hotspot == hotspot && &f.shelter == shelter && &f.category == category)
            .map(|f| f.people)
            .sum()
    }

    pub fn shortfall(&self, hotspot: &HotspotId, category: &Category) -> f64 {
        self.shortfalls
            .iter()
            .filter(|s| &s.hotspot == hotspot && &s.category == category)
            .map(|s| s.people)
            .sum()
    }

    pub fn total_shortfall(&self) -> f64 {
        self.shortfalls.iter().map(|s| s.people).sum()
    }

    pub fn total_served(&self) -> f64 {
        self.flows.iter().map(|f| f.people).sum()
    }

    pub fn shortfall_by_category(&self) -> BTreeMap<Category, f64> {
        let mut totals = BTreeMap::new();
        for s in &self.shortfalls {
            *totals.entry(s.category.clone()).or_insert(0.0) += s.people;
        }
        totals
    }

    /// People placed in `shelter` across all hotspots and categories
    pub fn shelter_load(&self, shelter: &ShelterId) -> f64 {
        self.flows
            .iter()
            .filter(|f| &f.shelter == shelter)
            .map(|f| f.people)
            .sum()
    }

    /// Distance-weighted flow; unreachable flows count as zero distance
    pub fn total_distance(&self, network: &Network) -> f64 {
        self.flows
            .iter()
            .map(|f| f.people * network.distance(&f.hotspot, &f.shelter).unwrap_or(0.0))
            .sum()
    }

    /// Every broken allocation invariant, empty for a valid plan
    pub fn violations(&self, network: &Network, demand: &Demand, tolerance: f64) -> Vec<Violation> {
        let mut found = Vec::new();

        for f in &self.flows {
            if f.people < -tolerance {
                found.push(Violation::Negative {
                    what: format!("flow {}->{} ({})", f.hotspot, f.shelter, f.category),
                    value: f.people,
                });
            }
            if f.people.abs() <= tolerance {
                continue;
            }
            if network.distance(&f.hotspot, &f.shelter).is_none() {
                found.push(Violation::Unreachable {
                    hotspot: f.hotspot.clone(),
                    shelter: f.shelter.clone(),
                    people: f.people,
                });
            }
            let eligible = network
                .shelter(&f.shelter)
                .is_some_and(|s| s.accepts(&f.category));
            if !eligible {
                found.push(Violation::Ineligible {
                    shelter: f.shelter.clone(),
                    category: f.category.clone(),
                    people: f.people,
                });
            }
        }

        for s in &self.shortfalls {
            if s.people < -tolerance {
                found.push(Violation::Negative {
                    what: format!("shortfall {} ({})", s.hotspot, s.category),
                    value: s.people,
                });
            }
        }

        for hotspot in network.hotspots() {
            for category in network.categories() {
                let expected = demand.people(hotspot, category);
                let placed: f64 = self
                    .flows
                    .iter()
                    .filter(|f| &f.hotspot == hotspot && &f.category == category)
                    .map(|f| f.people)
                    .sum();
                let accounted = placed + self.shortfall(hotspot, category);
                if (accounted - expected).abs() > tolerance {
                    found.push(Violation::Conservation {
                        hotspot: hotspot.clone(),
                        category: category.clone(),
                        demand: expected,
                        accounted,
                    });
                }
            }
        }

        for shelter in network.shelters() {
            let load = self.shelter_load(&shelter.id);
            if load > shelter.capacity + tolerance {
                found.push(Violation::Capacity {
                    shelter: shelter.id.clone(),
                    load,
                    capacity: shelter.capacity,
                });
            }
        }

        found
    }
}

/// A broken allocation invariant
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Conservation {
        hotspot: HotspotId,
        category: Category,
        demand: f64,
        accounted: f64,
    },
    Capacity {
        shelter: ShelterId,
        load: f64,
        capacity: f64,
    },
    Ineligible {
        shelter: ShelterId,
        category: Category,
        people: f64,
    },
    Unreachable {
        hotspot: HotspotId,
        shelter: ShelterId,
        people: f64,
    },
    Negative {
        what: String,
        value: f64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Conservation {
                hotspot,
                category,
                demand,
                accounted,
            } => write!(
                f,
                "{hotspot}/{category}: flow plus shortfall is {accounted}, demand is {demand}"
            ),
            Violation::Capacity {
                shelter,
                load,
                capacity,
            } => write!(f, "shelter {shelter} holds {load} with capacity {capacity}"),
            Violation::Ineligible {
                shelter,
                category,
                people,
            } => write!(f, "{people} {category} referred to ineligible shelter {shelter}"),
            Violation::Unreachable {
                hotspot,
                shelter,
                people,
            } => write!(f, "{people} referred from {hotspot} to unreachable shelter {shelter}"),
            Violation::Negative { what, value } => write!(f, "{what} is negative ({value})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Shelter;

    fn network() -> Network {
        Network::builder()
            .hotspot("A")
            .category("men")
            .category("women")
            .shelter(Shelter::new("X", 1.0).eligible_for(["men"]))
            .shelter(Shelter::new("Y", 1.0).eligible_for(["women"]))
            .distance("A", "X", 1.0)
            .build()
            .unwrap()
    }

    fn flow(shelter: &str, category: &str, people: f64) -> Flow {
        Flow {
            hotspot: "A".into(),
            shelter: shelter.into(),
            category: category.into(),
            people,
        }
    }

    fn shortfall(category: &str, people: f64) -> Shortfall {
        Shortfall {
            hotspot: "A".into(),
            category: category.into(),
            people,
        }
    }

    #[test]
    fn valid_plan_has_no_violations() {
        let demand = Demand::new().with("A", "men", 2.0).with("A", "women", 1.0);
        let plan = Allocation {
            flows: vec![flow("X", "men", 1.0)],
            shortfalls: vec![shortfall("men", 1.0), shortfall("women", 1.0)],
        };

        assert!(plan.violations(&network(), &demand, 1e-6).is_empty());
        assert_eq!(plan.total_distance(&network()), 1.0);
        assert_eq!(plan.shortfall_by_category()[&Category::from("men")], 1.0);
    }

    #[test]
    fn every_invariant_is_checked() {
        let demand = Demand::new().with("A", "men", 1.0).with("A", "women", 1.0);
        let plan = Allocation {
            flows: vec![flow("X", "men", 2.0), flow("X", "women", 1.0), flow("Y", "women", 1.0)],
            shortfalls: vec![shortfall("men", -1.0), shortfall("women", 0.0)],
        };

        let violations = plan.violations(&network(), &demand, 1e-6);

        assert!(violations.iter().any(|v| matches!(v, Violation::Capacity { .. })));
        assert!(violations.iter().any(|v| matches!(v, Violation::Ineligible { .. })));
        assert!(violations.iter().any(|v| matches!(v, Violation::Unreachable { .. })));
        assert!(violations.iter().any(|v| matches!(v, Violation::Negative { .. })));
        assert!(violations.iter().any(|v| matches!(v, Violation::Conservation { .. })));
    }
}
