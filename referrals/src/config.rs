//! TOML experiment configuration
//!
//! ```toml
//! [experiment]
//! name = "toronto_downtown"
//!
//! [tables]
//! demand = "../data/demand.csv"
//! distance = "../data/distance.csv"
//! capacity = "../data/capacity.csv"
//! eligibility = "../data/eligibility.csv"
//!
//! [solver]
//! domain = "integer"
//! parallel = true
//!
//! [monte_carlo]
//! origin = "downtown"
//! heuristics = ["random", "nearest"]
//! ```
//!
//! Relative table and output paths are resolved against the directory holding
//! the config file.

use crate::heuristics::{Allocator, allocator_by_name};
use crate::monte_carlo::{MonteCarloConfig, MonthlyRates};
use crate::network::{Category, Network};
use crate::runner::RunnerOptions;
use crate::solver::{SolverOptions, VariableDomain};
use crate::tables::{TablePaths, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use trials::Execution;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse experiment config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("unknown heuristic {0:?} (expected \"random\" or \"nearest\")")]
    UnknownHeuristic(String),
}

/// Top-level experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment: ExperimentMetadata,
    pub tables: TablesConfig,
    #[serde(default)]
    pub solver: SolverSettings,
    pub monte_carlo: Option<MonteCarloSettings>,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(flatten)]
    pub paths: TablePaths,
    #[serde(default)]
    pub schema: TableSchema,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub domain: VariableDomain,
    pub time_limit_secs: Option<f64>,
    pub parallel: bool,
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloSettings {
    pub origin: String,
    #[serde(default)]
    pub month_index: usize,
    #[serde(default = "default_n_days")]
    pub n_days: usize,
    #[serde(default = "default_days_in_month")]
    pub days_in_month: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_heuristics")]
    pub heuristics: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    pub threads: Option<usize>,
    /// Category -> one monthly total per month. Derived from the demand table
    /// when absent.
    pub monthly_rates: Option<BTreeMap<String, Vec<f64>>>,
}

fn default_n_days() -> usize {
    1000
}

fn default_days_in_month() -> u32 {
    30
}

fn default_seed() -> u64 {
    123
}

fn default_heuristics() -> Vec<String> {
    vec!["random".to_string(), "nearest".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub save_flows: bool,
    pub save_shortfalls: bool,
    pub save_period_summaries: bool,
    pub save_shelter_usage: bool,
    pub save_daily_series: bool,
    pub save_summary_json: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            dir: PathBuf::from("results"),
            save_flows: true,
            save_shortfalls: true,
            save_period_summaries: true,
            save_shelter_usage: true,
            save_daily_series: true,
            save_summary_json: true,
        }
    }
}

fn execution(parallel: bool, threads: Option<usize>) -> Execution {
    if parallel {
        Execution::Parallel { threads }
    } else {
        Execution::Sequential
    }
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml_str(&text, base_dir)
    }

    pub fn from_toml_str(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: ExperimentConfig = toml::from_str(text)?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.name.trim().is_empty() {
            return Err(ConfigError::Invalid("experiment name is empty".to_string()));
        }
        if let Some(secs) = self.solver.time_limit_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "solver time_limit_secs is {secs}; expected a non-negative number"
                )));
            }
        }
        if let Some(mc) = &self.monte_carlo {
            for name in &mc.heuristics {
                if allocator_by_name(name).is_none() {
                    return Err(ConfigError::UnknownHeuristic(name.clone()));
                }
            }
            if let Some(rates) = &mc.monthly_rates {
                let mut lengths = rates.values().map(Vec::len);
                if let Some(first) = lengths.next() {
                    if lengths.any(|len| len != first) {
                        return Err(ConfigError::Invalid(
                            "monthly_rates lists must all cover the same months".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Table paths resolved against the config directory
    pub fn table_paths(&self) -> TablePaths {
        self.tables.paths.relative_to(&self.base_dir)
    }

    /// `<output.dir>/<experiment.name>`, resolved against the config directory
    pub fn output_dir(&self) -> PathBuf {
        self.base_dir
            .join(&self.output.dir)
            .join(&self.experiment.name)
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            solver: SolverOptions {
                domain: self.solver.domain,
                time_limit: self.solver.time_limit_secs.map(Duration::from_secs_f64),
            },
            execution: execution(self.solver.parallel, self.solver.threads),
        }
    }

    fn monte_carlo_settings(&self) -> Result<&MonteCarloSettings, ConfigError> {
        self.monte_carlo
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("config has no [monte_carlo] section".to_string()))
    }

    pub fn monte_carlo_config(&self) -> Result<MonteCarloConfig, ConfigError> {
        let mc = self.monte_carlo_settings()?;
        Ok(MonteCarloConfig {
            origin: mc.origin.as_str().into(),
            month_index: mc.month_index,
            n_days: mc.n_days,
            days_in_month: mc.days_in_month,
            seed: mc.seed,
            execution: execution(mc.parallel, mc.threads),
        })
    }

    pub fn allocators(&self) -> Result<Vec<Box<dyn Allocator>>, ConfigError> {
        self.monte_carlo_settings()?
            .heuristics
            .iter()
            .map(|name| allocator_by_name(name).ok_or_else(|| ConfigError::UnknownHeuristic(name.clone())))
            .collect()
    }

    /// Configured monthly rates, one map per month, restricted to the network's
    /// categories. `None` when the config leaves rates to the demand table.
    pub fn monthly_rates(&self, network: &Network) -> Result<Option<Vec<MonthlyRates>>, ConfigError> {
        let Some(rates) = &self.monte_carlo_settings()?.monthly_rates else {
            return Ok(None);
        };
        let months = rates.values().map(Vec::len).max().unwrap_or(0);
        let mut by_month = vec![MonthlyRates::new(); months];
        for (category, totals) in rates {
            let category = Category::new(category.as_str());
            if !network.has_category(&category) {
                return Err(ConfigError::Invalid(format!(
                    "monthly_rates lists unknown category {category}"
                )));
            }
            for (month, &total) in totals.iter().enumerate() {
                by_month[month].insert(category.clone(), total);
            }
        }
        Ok(Some(by_month))
    }
}
