//! Per-period and per-day demand

use crate::error::{ReferralError, Result};
use crate::network::{Category, HotspotId, Network};
use std::collections::BTreeMap;

/// Expected arrivals per (hotspot, category) for one period
///
/// Every pair the solver is asked to satisfy must be present: a missing pair is
/// an input error, never an implicit zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demand {
    values: BTreeMap<HotspotId, BTreeMap<Category, f64>>,
}

impl Demand {
    pub fn new() -> Self {
        Demand::default()
    }

    pub fn with(
        mut self,
        hotspot: impl Into<HotspotId>,
        category: impl Into<Category>,
        people: f64,
    ) -> Self {
        self.set(hotspot, category, people);
        self
    }

    pub fn set(&mut self, hotspot: impl Into<HotspotId>, category: impl Into<Category>, people: f64) {
        self.values
            .entry(hotspot.into())
            .or_default()
            .insert(category.into(), people);
    }

    pub fn get(&self, hotspot: &HotspotId, category: &Category) -> Option<f64> {
        self.values.get(hotspot)?.get(category).copied()
    }

    /// Demand for a pair already checked by [`validate`](Self::validate)
    pub(crate) fn people(&self, hotspot: &HotspotId, category: &Category) -> f64 {
        self.get(hotspot, category).unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.values.values().flat_map(BTreeMap::values).sum()
    }

    pub fn category_total(&self, category: &Category) -> f64 {
        self.values
            .values()
            .filter_map(|by_category| by_category.get(category))
            .sum()
    }

    /// Check that every (hotspot, category) of `network` has a finite,
    /// non-negative value and that nothing outside the network is declared
    pub fn validate(&self, network: &Network) -> Result<()> {
        for (hotspot, by_category) in &self.values {
            if !network.has_hotspot(hotspot) {
                return Err(ReferralError::invalid(format!(
                    "demand declared for unknown hotspot {hotspot}"
                )));
            }
            for (category, people) in by_category {
                if !network.has_category(category) {
                    return Err(ReferralError::invalid(format!(
                        "demand declared for unknown category {category} at {hotspot}"
                    )));
                }
                if !people.is_finite() || *people < 0.0 {
                    return Err(ReferralError::invalid(format!(
                        "demand {hotspot}/{category} is {people}; demand must be non-negative"
                    )));
                }
            }
        }

        for hotspot in network.hotspots() {
            for category in network.categories() {
                if self.get(hotspot, category).is_none() {
                    return Err(ReferralError::invalid(format!(
                        "missing demand for hotspot {hotspot}, category {category}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// People arriving on one day, per (hotspot, category)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyDemand {
    arrivals: BTreeMap<HotspotId, BTreeMap<Category, u64>>,
}

impl DailyDemand {
    pub fn new() -> Self {
        DailyDemand::default()
    }

    pub fn with(
        mut self,
        hotspot: impl Into<HotspotId>,
        category: impl Into<Category>,
        people: u64,
    ) -> Self {
        self.set(hotspot, category, people);
        self
    }

    pub fn set(&mut self, hotspot: impl Into<HotspotId>, category: impl Into<Category>, people: u64) {
        self.arrivals
            .entry(hotspot.into())
            .or_default()
            .insert(category.into(), people);
    }

    /// Arrivals for a pair; absent pairs had nobody arrive
    pub fn get(&self, hotspot: &HotspotId, category: &Category) -> u64 {
        self.arrivals
            .get(hotspot)
            .and_then(|by_category| by_category.get(category))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.arrivals.values().flat_map(BTreeMap::values).sum()
    }

    pub fn category_total(&self, category: &Category) -> u64 {
        self.arrivals
            .values()
            .filter_map(|by_category| by_category.get(category))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Shelter;

    fn network() -> Network {
        Network::builder()
            .hotspot("A")
            .hotspot("B")
            .category("men")
            .category("women")
            .shelter(Shelter::new("X", 1.0).eligible_for(["men"]))
            .build()
            .unwrap()
    }

    fn complete() -> Demand {
        Demand::new()
            .with("A", "men", 1.0)
            .with("A", "women", 1.0)
            .with("B", "men", 0.0)
            .with("B", "women", 0.0)
    }

    #[test]
    fn complete_demand_validates() {
        assert!(complete().validate(&network()).is_ok());
        assert_eq!(complete().total(), 2.0);
        assert_eq!(complete().category_total(&"men".into()), 1.0);
    }

    #[test]
    fn missing_pair_is_not_an_implicit_zero() {
        let demand = Demand::new()
            .with("A", "men", 1.0)
            .with("A", "women", 1.0)
            .with("B", "men", 0.0);

        let err = demand.validate(&network()).unwrap_err();
        assert_eq!(
            err,
            ReferralError::InvalidInput("missing demand for hotspot B, category women".into())
        );
    }

    #[test]
    fn negative_demand_is_rejected() {
        let demand = complete().with("B", "men", -2.0);
        assert!(demand.validate(&network()).is_err());
    }

    #[test]
    fn unknown_hotspot_is_rejected() {
        let demand = complete().with("C", "men", 1.0);
        assert!(demand.validate(&network()).is_err());
    }

    #[test]
    fn daily_demand_defaults_to_nobody() {
        let day = DailyDemand::new().with("A", "men", 3).with("A", "women", 2);

        assert_eq!(day.get(&"A".into(), &"men".into()), 3);
        assert_eq!(day.get(&"B".into(), &"men".into()), 0);
        assert_eq!(day.total(), 5);
        assert_eq!(day.category_total(&"women".into()), 2);
    }
}
