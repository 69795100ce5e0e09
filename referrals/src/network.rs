//! Hotspots, shelters, categories and the distances between them
//!
//! A [`Network`] is the fixed part of every referral problem. It is validated
//! once when built and then shared read-only by every solve and every trial.

use crate::error::{ReferralError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }
    };
}

string_id!(
    /// Demand origin (e.g. a forward sortation area)
    HotspotId
);
string_id!(
    /// Shelter record key; several records can share one physical location
    ShelterId
);
string_id!(
    /// Protected group with its own eligibility and conservation constraints
    Category
);

/// A shelter with limited beds and category eligibility rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shelter {
    pub id: ShelterId,
    pub name: String,
    /// Named location used by the distance table
    pub location: Option<String>,
    pub capacity: f64,
    pub eligible: BTreeSet<Category>,
}

impl Shelter {
    pub fn new(id: impl Into<ShelterId>, capacity: f64) -> Self {
        let id = id.into();
        Shelter {
            name: id.to_string(),
            id,
            location: None,
            capacity,
            eligible: BTreeSet::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Mark the shelter eligible for the given categories
    pub fn eligible_for<I, C>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Category>,
    {
        self.eligible.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn accepts(&self, category: &Category) -> bool {
        self.eligible.contains(category)
    }

    /// Whole beds; heuristics place people one bed at a time
    pub fn beds(&self) -> u64 {
        self.capacity.floor() as u64
    }
}

/// The fixed network parameters of a referral problem
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    hotspots: Vec<HotspotId>,
    shelters: Vec<Shelter>,
    categories: Vec<Category>,
    distances: BTreeMap<HotspotId, BTreeMap<ShelterId, f64>>,
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn hotspots(&self) -> &[HotspotId] {
        &self.hotspots
    }

    pub fn shelters(&self) -> &[Shelter] {
        &self.shelters
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn shelter(&self, id: &ShelterId) -> Option<&Shelter> {
        self.shelters.iter().find(|s| &s.id == id)
    }

    pub fn has_hotspot(&self, id: &HotspotId) -> bool {
        self.hotspots.contains(id)
    }

    pub fn has_category(&self, category: &Category) -> bool {
        self.categories.contains(category)
    }

    /// Distance from hotspot to shelter, `None` when the pair is unreachable
    pub fn distance(&self, hotspot: &HotspotId, shelter: &ShelterId) -> Option<f64> {
        self.distances.get(hotspot)?.get(shelter).copied()
    }

    /// Shelters reachable from `hotspot`, in roster order
    pub fn reachable<'a>(
        &'a self,
        hotspot: &'a HotspotId,
    ) -> impl Iterator<Item = (&'a Shelter, f64)> + 'a {
        self.shelters
            .iter()
            .filter_map(move |s| self.distance(hotspot, &s.id).map(|d| (s, d)))
    }

    pub fn num_reachable_pairs(&self) -> usize {
        self.distances.values().map(BTreeMap::len).sum()
    }

    pub fn total_capacity(&self) -> f64 {
        self.shelters.iter().map(|s| s.capacity).sum()
    }
}

/// Collects network parts and validates them on [`build`](Self::build)
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    hotspots: Vec<HotspotId>,
    shelters: Vec<Shelter>,
    categories: Vec<Category>,
    distances: Vec<(HotspotId, ShelterId, f64)>,
}

impl NetworkBuilder {
    pub fn hotspot(mut self, id: impl Into<HotspotId>) -> Self {
        self.hotspots.push(id.into());
        self
    }

    pub fn category(mut self, category: impl Into<Category>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn shelter(mut self, shelter: Shelter) -> Self {
        self.shelters.push(shelter);
        self
    }

    pub fn distance(
        mut self,
        hotspot: impl Into<HotspotId>,
        shelter: impl Into<ShelterId>,
        distance: f64,
    ) -> Self {
        self.distances.push((hotspot.into(), shelter.into(), distance));
        self
    }

    pub fn build(self) -> Result<Network> {
        ensure_unique("hotspot", self.hotspots.iter())?;
        ensure_unique("category", self.categories.iter())?;
        ensure_unique("shelter", self.shelters.iter().map(|s| &s.id))?;

        for shelter in &self.shelters {
            if !shelter.capacity.is_finite() || shelter.capacity < 0.0 {
                return Err(ReferralError::invalid(format!(
                    "shelter {} has capacity {}; capacity must be a non-negative number",
                    shelter.id, shelter.capacity
                )));
            }
            if let Some(unknown) = shelter.eligible.iter().find(|g| !self.categories.contains(g)) {
                return Err(ReferralError::invalid(format!(
                    "shelter {} lists eligibility for unknown category {}",
                    shelter.id, unknown
                )));
            }
        }

        let mut distances: BTreeMap<HotspotId, BTreeMap<ShelterId, f64>> = BTreeMap::new();
        for (hotspot, shelter, distance) in self.distances {
            if !self.hotspots.contains(&hotspot) {
                return Err(ReferralError::invalid(format!(
                    "distance references unknown hotspot {hotspot}"
                )));
            }
            if !self.shelters.iter().any(|s| s.id == shelter) {
                return Err(ReferralError::invalid(format!(
                    "distance references unknown shelter {shelter}"
                )));
            }
            if !distance.is_finite() || distance < 0.0 {
                return Err(ReferralError::invalid(format!(
                    "distance {hotspot}->{shelter} is {distance}; distances must be non-negative"
                )));
            }
            distances.entry(hotspot).or_default().insert(shelter, distance);
        }

        Ok(Network {
            hotspots: self.hotspots,
            shelters: self.shelters,
            categories: self.categories,
            distances,
        })
    }
}

fn ensure_unique<'a, T>(what: &str, ids: impl Iterator<Item = &'a T>) -> Result<()>
where
    T: Ord + fmt::Display + 'a,
{
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ReferralError::invalid(format!("duplicate {what} {id}")));
        }
    }
    Ok(())
}
