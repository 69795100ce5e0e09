//! Loading the prepared input tables
//!
//! The ETL side delivers four CSV tables: demand per (period, hotspot), a
//! distance matrix with one row per named location and one column per hotspot,
//! shelter capacities, and per-category eligibility flags. Column names are
//! configurable through [`TableSchema`]; the defaults match the Toronto tables.

use crate::demand::Demand;
use crate::error::ReferralError;
use crate::monte_carlo::MonthlyRates;
use crate::network::{Category, HotspotId, Network, Shelter, ShelterId};
use crate::runner::Period;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("{table} table has no column {column}")]
    MissingColumn { table: &'static str, column: String },

    #[error("{table} table row {row}, column {column}: cannot read {value:?} as a number")]
    BadNumber {
        table: &'static str,
        row: usize,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Invalid(#[from] ReferralError),
}

/// Column names of the four input tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub categories: Vec<String>,
    pub period_column: String,
    pub hotspot_column: String,
    /// Category -> demand column
    pub demand_columns: BTreeMap<String, String>,
    pub location_column: String,
    pub shelter_name_column: String,
    pub capacity_column: String,
    /// Category -> eligibility column
    pub eligibility_columns: BTreeMap<String, String>,
}

impl Default for TableSchema {
    fn default() -> Self {
        TableSchema {
            categories: vec!["men".to_string(), "women".to_string()],
            period_column: "month".to_string(),
            hotspot_column: "CFSAUID".to_string(),
            demand_columns: BTreeMap::from([
                ("men".to_string(), "male_from_hotspot".to_string()),
                ("women".to_string(), "female_from_hotspot".to_string()),
            ]),
            location_column: "LOCATION_NAME".to_string(),
            shelter_name_column: "SHELTER_NAME".to_string(),
            capacity_column: "CAPACITY".to_string(),
            eligibility_columns: BTreeMap::from([
                ("men".to_string(), "men_eligible_eligible".to_string()),
                ("women".to_string(), "women_eligible_eligible".to_string()),
            ]),
        }
    }
}

impl TableSchema {
    fn demand_column<'a>(&'a self, category: &'a str) -> &'a str {
        self.demand_columns
            .get(category)
            .map(String::as_str)
            .unwrap_or(category)
    }

    fn eligibility_column<'a>(&'a self, category: &'a str) -> &'a str {
        self.eligibility_columns
            .get(category)
            .map(String::as_str)
            .unwrap_or(category)
    }
}

/// Where the four tables live on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePaths {
    pub demand: PathBuf,
    pub distance: PathBuf,
    pub capacity: PathBuf,
    pub eligibility: PathBuf,
}

impl TablePaths {
    /// Resolve relative paths against `base`
    pub fn relative_to(&self, base: &Path) -> TablePaths {
        TablePaths {
            demand: base.join(&self.demand),
            distance: base.join(&self.distance),
            capacity: base.join(&self.capacity),
            eligibility: base.join(&self.eligibility),
        }
    }
}

/// Network and ordered periods read from disk
#[derive(Debug, Clone)]
pub struct LoadedTables {
    pub network: Network,
    pub periods: Vec<Period>,
}

pub fn load_from_paths(schema: &TableSchema, paths: &TablePaths) -> Result<LoadedTables, TableError> {
    let network = load_network(
        schema,
        open(&paths.capacity)?,
        open(&paths.eligibility)?,
        open(&paths.distance)?,
    )?;
    let periods = load_periods(schema, &network, open(&paths.demand)?)?;
    tracing::info!(
        hotspots = network.hotspots().len(),
        shelters = network.shelters().len(),
        reachable_pairs = network.num_reachable_pairs(),
        periods = periods.len(),
        "tables loaded"
    );
    Ok(LoadedTables { network, periods })
}

fn open(path: &Path) -> Result<File, TableError> {
    File::open(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the network from capacity, eligibility and distance tables
///
/// Shelter ids are capacity-table row numbers. Distance rows are keyed by
/// location name and apply to every shelter record sharing that name.
pub fn load_network(
    schema: &TableSchema,
    capacity: impl Read,
    eligibility: impl Read,
    distance: impl Read,
) -> Result<Network, TableError> {
    let capacity = Table::read("capacity", capacity)?;
    let eligibility = Table::read("eligibility", eligibility)?;
    let distance = Table::read("distance", distance)?;

    let cap_name = capacity.column(&schema.shelter_name_column)?;
    let cap_beds = capacity.column(&schema.capacity_column)?;
    let elig_name = eligibility.column(&schema.shelter_name_column)?;
    let elig_flags = schema
        .categories
        .iter()
        .map(|g| -> Result<_, TableError> {
            Ok((Category::new(g.as_str()), eligibility.column(schema.eligibility_column(g))?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = Network::builder();
    for category in &schema.categories {
        builder = builder.category(category.as_str());
    }

    let mut by_location: BTreeMap<String, Vec<ShelterId>> = BTreeMap::new();
    for (row_index, row) in capacity.rows.iter().enumerate() {
        let name = field(row, cap_name);
        let beds = capacity.number(row_index, row, cap_beds)?;

        // Eligibility rows normally line up with capacity rows; fall back to a
        // name lookup when they don't.
        let flags_row = match eligibility.rows.get(row_index) {
            Some(candidate) if field(candidate, elig_name) == name => Some((row_index, candidate)),
            _ => eligibility
                .rows
                .iter()
                .enumerate()
                .find(|(_, candidate)| field(candidate, elig_name) == name),
        };
        let Some((flags_index, flags_row)) = flags_row else {
            tracing::warn!(shelter = name, "no eligibility row, skipping shelter");
            continue;
        };

        let mut eligible = Vec::new();
        for (category, column) in &elig_flags {
            if eligibility.flag(flags_index, flags_row, *column)? {
                eligible.push(category.clone());
            }
        }

        let id = ShelterId::new(row_index.to_string());
        by_location.entry(name.to_string()).or_default().push(id.clone());
        builder = builder.shelter(Shelter::new(id, beds).named(name).at(name).eligible_for(eligible));
    }

    let location = distance.column(&schema.location_column)?;
    let hotspot_columns: Vec<(usize, HotspotId)> = distance
        .headers
        .iter()
        .enumerate()
        .filter(|(i, header)| *i != location && !header.is_empty() && !header.starts_with("Unnamed"))
        .map(|(i, header)| (i, HotspotId::new(header)))
        .collect();
    for (_, hotspot) in &hotspot_columns {
        builder = builder.hotspot(hotspot.clone());
    }

    for (row_index, row) in distance.rows.iter().enumerate() {
        let Some(shelters) = by_location.get(field(row, location)) else {
            continue;
        };
        for (column, hotspot) in &hotspot_columns {
            // Blank cells mark unreachable pairs
            if field(row, *column).is_empty() {
                continue;
            }
            let km = distance.number(row_index, row, *column)?;
            for shelter in shelters {
                builder = builder.distance(hotspot.clone(), shelter.clone(), km);
            }
        }
    }

    Ok(builder.build()?)
}

/// Read per-period demand, ordered by period label
///
/// Rows for hotspots outside the network are ignored. Labels sort numerically
/// when all of them are integers.
pub fn load_periods(schema: &TableSchema, network: &Network, demand: impl Read) -> Result<Vec<Period>, TableError> {
    let table = Table::read("demand", demand)?;
    let period = table.column(&schema.period_column)?;
    let hotspot = table.column(&schema.hotspot_column)?;
    let counts = network
        .categories()
        .iter()
        .map(|g| -> Result<_, TableError> { Ok((g.clone(), table.column(schema.demand_column(g.as_str()))?)) })
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_label: BTreeMap<String, Demand> = BTreeMap::new();
    let mut skipped = 0usize;
    for (row_index, row) in table.rows.iter().enumerate() {
        let id = HotspotId::new(field(row, hotspot));
        if !network.has_hotspot(&id) {
            skipped += 1;
            continue;
        }
        let demand = by_label.entry(field(row, period).to_string()).or_default();
        for (category, column) in &counts {
            demand.set(id.clone(), category.clone(), table.number(row_index, row, *column)?);
        }
    }
    if skipped > 0 {
        tracing::debug!(rows = skipped, "demand rows for unknown hotspots ignored");
    }

    let mut periods: Vec<Period> = by_label
        .into_iter()
        .map(|(label, demand)| Period::new(label, demand))
        .collect();
    let numeric: Option<Vec<i64>> = periods.iter().map(|p| p.label.parse().ok()).collect();
    if let Some(keys) = numeric {
        let mut keyed: Vec<(i64, Period)> = keys.into_iter().zip(periods).collect();
        keyed.sort_by_key(|(key, _)| *key);
        periods = keyed.into_iter().map(|(_, p)| p).collect();
    }
    Ok(periods)
}

/// Monthly totals per category, one entry per period
pub fn monthly_rates(network: &Network, periods: &[Period]) -> Vec<MonthlyRates> {
    periods
        .iter()
        .map(|period| {
            network
                .categories()
                .iter()
                .map(|g| (g.clone(), period.demand.category_total(g)))
                .collect()
        })
        .collect()
}

struct Table {
    name: &'static str,
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    fn read(name: &'static str, reader: impl Read) -> Result<Table, TableError> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv.headers()?.clone();
        let rows = csv.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Table { name, headers, rows })
    }

    fn column(&self, column: &str) -> Result<usize, TableError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| TableError::MissingColumn {
                table: self.name,
                column: column.to_string(),
            })
    }

    fn number(&self, row_index: usize, row: &StringRecord, column: usize) -> Result<f64, TableError> {
        let value = field(row, column);
        value.parse::<f64>().map_err(|_| self.bad_number(row_index, column, value))
    }

    fn flag(&self, row_index: usize, row: &StringRecord, column: usize) -> Result<bool, TableError> {
        let value = field(row, column);
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" | "" => Ok(false),
            other => other
                .parse::<f64>()
                .map(|n| n != 0.0)
                .map_err(|_| self.bad_number(row_index, column, value)),
        }
    }

    fn bad_number(&self, row_index: usize, column: usize, value: &str) -> TableError {
        TableError::BadNumber {
            table: self.name,
            row: row_index,
            column: self.headers.get(column).unwrap_or_default().to_string(),
            value: value.to_string(),
        }
    }
}

fn field(row: &StringRecord, column: usize) -> &str {
    row.get(column).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: &str = "\
SHELTER_NAME,CAPACITY
Seaton House,264
Women's Residence,44
Seaton House,30
Nowhere Inn,10
";

    const ELIGIBILITY: &str = "\
SHELTER_NAME,men_eligible_eligible,women_eligible_eligible
Seaton House,1,0
Seaton House,1,0
Women's Residence,0,1
";

    const DISTANCE: &str = "\
Unnamed: 0,LOCATION_NAME,M5A,M4Y
0,Seaton House,1.5,2.25
1,Women's Residence,0.75,
";

    const DEMAND: &str = "\
month,CFSAUID,male_from_hotspot,female_from_hotspot
10,M5A,4,2
2,M5A,3,1
2,M4Y,1,0
10,M4Y,0,5
2,L4K,7,7
";

    fn network() -> Network {
        load_network(
            &TableSchema::default(),
            CAPACITY.as_bytes(),
            ELIGIBILITY.as_bytes(),
            DISTANCE.as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn shelters_are_keyed_by_capacity_row() {
        let network = network();

        // Nowhere Inn has no eligibility row
        assert_eq!(network.shelters().len(), 3);
        let women = network.shelter(&"1".into()).unwrap();
        assert_eq!(women.name, "Women's Residence");
        assert_eq!(women.capacity, 44.0);
        assert!(women.accepts(&"women".into()));
        assert!(!women.accepts(&"men".into()));
    }

    #[test]
    fn misaligned_eligibility_rows_fall_back_to_name() {
        let network = network();
        // Capacity row 2 meets eligibility row 2 (Women's Residence), so the
        // flags come from the first Seaton House row instead
        let annex = network.shelter(&"2".into()).unwrap();
        assert!(annex.accepts(&"men".into()));
        assert!(!annex.accepts(&"women".into()));
    }

    #[test]
    fn distance_rows_fan_out_to_shared_locations() {
        let network = network();

        let hotspots: Vec<&str> = network.hotspots().iter().map(HotspotId::as_str).collect();
        assert_eq!(hotspots, ["M5A", "M4Y"]);
        assert_eq!(network.distance(&"M5A".into(), &"0".into()), Some(1.5));
        assert_eq!(network.distance(&"M5A".into(), &"2".into()), Some(1.5));
        assert_eq!(network.distance(&"M4Y".into(), &"1".into()), None);
    }

    #[test]
    fn periods_sort_numerically_and_skip_unknown_hotspots() {
        let network = network();
        let periods = load_periods(&TableSchema::default(), &network, DEMAND.as_bytes()).unwrap();

        let labels: Vec<&str> = periods.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["2", "10"]);
        assert_eq!(periods[0].demand.get(&"M5A".into(), &"men".into()), Some(3.0));
        assert_eq!(periods[0].demand.get(&"L4K".into(), &"men".into()), None);
        assert!(periods[1].demand.validate(&network).is_ok());

        let rates = monthly_rates(&network, &periods);
        assert_eq!(rates[1][&Category::from("women")], 7.0);
    }

    #[test]
    fn unmapped_categories_read_columns_named_after_them() {
        let schema = TableSchema {
            categories: vec!["men".to_string(), "youth".to_string()],
            ..TableSchema::default()
        };
        assert_eq!(schema.demand_column("youth"), "youth");
        assert_eq!(schema.demand_column("men"), "male_from_hotspot");
        assert_eq!(schema.eligibility_column("youth"), "youth");

        let eligibility = "\
SHELTER_NAME,men_eligible_eligible,youth
Seaton House,1,0
Women's Residence,0,1
";
        let network = load_network(&schema, CAPACITY.as_bytes(), eligibility.as_bytes(), DISTANCE.as_bytes()).unwrap();
        assert!(network.shelter(&"1".into()).unwrap().accepts(&"youth".into()));
        assert!(!network.shelter(&"0".into()).unwrap().accepts(&"youth".into()));

        let demand = "month,CFSAUID,male_from_hotspot,youth\n1,M5A,2,3\n1,M4Y,0,1\n";
        let periods = load_periods(&schema, &network, demand.as_bytes()).unwrap();
        assert_eq!(periods[0].demand.get(&"M5A".into(), &"youth".into()), Some(3.0));
        assert!(periods[0].demand.validate(&network).is_ok());
    }

    #[test]
    fn missing_column_is_reported() {
        let err = load_network(
            &TableSchema::default(),
            "NAME,CAPACITY\nA,1\n".as_bytes(),
            ELIGIBILITY.as_bytes(),
            DISTANCE.as_bytes(),
        )
        .unwrap_err();

        assert!(matches!(err, TableError::MissingColumn { table: "capacity", .. }));
    }

    #[test]
    fn unparsable_capacity_is_reported() {
        let err = load_network(
            &TableSchema::default(),
            "SHELTER_NAME,CAPACITY\nSeaton House,lots\n".as_bytes(),
            ELIGIBILITY.as_bytes(),
            DISTANCE.as_bytes(),
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "capacity table row 0, column CAPACITY: cannot read \"lots\" as a number"
        );
    }
}
