//! CSV and JSON export of run results
//!
//! Flat tables go to CSV for analysis in pandas or a spreadsheet; the JSON
//! summary carries metadata for reproducibility alongside aggregate numbers.

use crate::config::{ExperimentConfig, OutputSettings};
use crate::monte_carlo::{MetricSummary, PolicyEvaluation, PolicySummary};
use crate::network::{Category, ShelterId};
use crate::runner::{CategoryStats, FlowRecord, ReferralRun, ShortfallRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Metadata for reproducibility
#[derive(Debug, Clone, Serialize)]
pub struct OutputMetadata {
    pub experiment: String,
    pub description: String,
    pub timestamp: String,
    pub seed: Option<u64>,
    pub config: ExperimentConfig,
}

impl OutputMetadata {
    pub fn new(config: &ExperimentConfig, seed: Option<u64>) -> Self {
        OutputMetadata {
            experiment: config.experiment.name.clone(),
            description: config.experiment.description.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            seed,
            config: config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub period: usize,
    pub label: String,
    pub total_served: f64,
    pub total_shortfall: f64,
    pub total_distance: f64,
    pub average_distance: f64,
    pub categories: BTreeMap<Category, CategoryStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelterUsageRecord {
    pub period: usize,
    pub label: String,
    pub shelter: ShelterId,
    pub name: String,
    pub used: f64,
    pub capacity: f64,
    pub utilization_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub period: usize,
    pub label: String,
    pub error: String,
}

/// Everything the monthly runner exports
#[derive(Debug, Clone, Serialize)]
pub struct ReferralOutput {
    pub metadata: OutputMetadata,
    pub periods: Vec<PeriodSummary>,
    pub failure: Option<FailureSummary>,
    #[serde(skip)]
    pub flows: Vec<FlowRecord>,
    #[serde(skip)]
    pub shortfalls: Vec<ShortfallRecord>,
    #[serde(skip)]
    pub shelter_usage: Vec<ShelterUsageRecord>,
}

impl ReferralOutput {
    pub fn from_run(run: &ReferralRun, metadata: OutputMetadata) -> Self {
        let periods = run
            .periods
            .iter()
            .map(|p| PeriodSummary {
                period: p.period,
                label: p.label.clone(),
                total_served: p.total_served,
                total_shortfall: p.total_shortfall,
                total_distance: p.total_distance,
                average_distance: p.average_distance,
                categories: p.categories.clone(),
            })
            .collect();

        let shelter_usage = run
            .periods
            .iter()
            .flat_map(|p| {
                p.shelters.iter().map(move |usage| ShelterUsageRecord {
                    period: p.period,
                    label: p.label.clone(),
                    shelter: usage.shelter.clone(),
                    name: usage.name.clone(),
                    used: usage.used,
                    capacity: usage.capacity,
                    utilization_pct: usage.utilization_pct,
                })
            })
            .collect();

        let failure = run.failure.as_ref().map(|f| FailureSummary {
            period: f.period,
            label: f.label.clone(),
            error: f.error.to_string(),
        });

        ReferralOutput {
            metadata,
            periods,
            failure,
            flows: run.flows.clone(),
            shortfalls: run.shortfalls.clone(),
            shelter_usage,
        }
    }

    pub fn write_flows_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        write_records(path, &self.flows)
    }

    pub fn write_shortfalls_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        write_records(path, &self.shortfalls)
    }

    pub fn write_shelter_usage_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        write_records(path, &self.shelter_usage)
    }

    /// One row per (period, category), then an `all` row per period
    pub fn write_period_summary_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record([
            "period",
            "label",
            "category",
            "served",
            "unsheltered",
            "distance",
            "average_distance",
        ])?;

        for summary in &self.periods {
            for (category, stats) in &summary.categories {
                wtr.write_record(&[
                    summary.period.to_string(),
                    summary.label.clone(),
                    category.to_string(),
                    stats.served.to_string(),
                    stats.shortfall.to_string(),
                    stats.distance.to_string(),
                    stats.average_distance.to_string(),
                ])?;
            }
            wtr.write_record(&[
                summary.period.to_string(),
                summary.label.clone(),
                "all".to_string(),
                summary.total_served.to_string(),
                summary.total_shortfall.to_string(),
                summary.total_distance.to_string(),
                summary.average_distance.to_string(),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn write_summary_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write the enabled outputs to a directory
    ///
    /// Creates (subject to `settings`):
    /// - referrals.csv
    /// - unsheltered.csv
    /// - period_summary.csv
    /// - shelter_usage.csv
    /// - summary.json
    pub fn write_all<P: AsRef<Path>>(
        &self,
        dir: P,
        settings: &OutputSettings,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        if settings.save_flows {
            self.write_flows_csv(dir.join("referrals.csv"))?;
        }
        if settings.save_shortfalls {
            self.write_shortfalls_csv(dir.join("unsheltered.csv"))?;
        }
        if settings.save_period_summaries {
            self.write_period_summary_csv(dir.join("period_summary.csv"))?;
        }
        if settings.save_shelter_usage {
            self.write_shelter_usage_csv(dir.join("shelter_usage.csv"))?;
        }
        if settings.save_summary_json {
            self.write_summary_json(dir.join("summary.json"))?;
        }

        Ok(())
    }
}

/// Everything the policy evaluator exports
#[derive(Debug, Clone, Serialize)]
pub struct PolicyOutput {
    pub metadata: OutputMetadata,
    pub n_days: usize,
    pub summaries: Vec<PolicySummary>,
    #[serde(skip)]
    pub evaluation: PolicyEvaluation,
}

impl PolicyOutput {
    pub fn new(evaluation: PolicyEvaluation, metadata: OutputMetadata) -> Self {
        PolicyOutput {
            metadata,
            n_days: evaluation.sampled_demand.len(),
            summaries: evaluation.summaries(),
            evaluation,
        }
    }

    /// One row per (day, policy)
    pub fn write_daily_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record(["day", "policy", "arrivals", "sheltered", "unsheltered", "total_distance"])?;

        for (day, demand) in self.evaluation.sampled_demand.iter().enumerate() {
            let arrivals: u64 = demand.values().sum();
            for series in &self.evaluation.series {
                wtr.write_record(&[
                    day.to_string(),
                    series.name.clone(),
                    arrivals.to_string(),
                    series.sheltered[day].to_string(),
                    series.unsheltered[day].to_string(),
                    series.total_distance[day].to_string(),
                ])?;
            }
        }

        wtr.flush()?;
        Ok(())
    }

    /// One row per (day, category) of sampled arrivals
    pub fn write_sampled_demand_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record(["day", "category", "arrivals"])?;
        for (day, demand) in self.evaluation.sampled_demand.iter().enumerate() {
            for (category, arrivals) in demand {
                wtr.write_record(&[day.to_string(), category.to_string(), arrivals.to_string()])?;
            }
        }

        wtr.flush()?;
        Ok(())
    }

    /// One row per (policy, metric)
    pub fn write_summary_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record(["policy", "metric", "mean", "std_dev", "min", "max", "p10", "p50", "p90"])?;

        for summary in &self.summaries {
            let metrics: [(&str, &MetricSummary); 3] = [
                ("sheltered", &summary.sheltered),
                ("unsheltered", &summary.unsheltered),
                ("total_distance", &summary.total_distance),
            ];
            for (metric, m) in metrics {
                wtr.write_record(&[
                    summary.name.clone(),
                    metric.to_string(),
                    m.mean.to_string(),
                    m.std_dev.to_string(),
                    m.min.to_string(),
                    m.max.to_string(),
                    m.p10.to_string(),
                    m.p50.to_string(),
                    m.p90.to_string(),
                ])?;
            }
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn write_summary_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Creates (subject to `settings`):
    /// - policy_daily.csv
    /// - sampled_demand.csv
    /// - policy_summary.csv
    /// - policy_summary.json
    pub fn write_all<P: AsRef<Path>>(
        &self,
        dir: P,
        settings: &OutputSettings,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        if settings.save_daily_series {
            self.write_daily_csv(dir.join("policy_daily.csv"))?;
            self.write_sampled_demand_csv(dir.join("sampled_demand.csv"))?;
        }
        self.write_summary_csv(dir.join("policy_summary.csv"))?;
        if settings.save_summary_json {
            self.write_summary_json(dir.join("policy_summary.json"))?;
        }

        Ok(())
    }
}

fn write_records<P: AsRef<Path>, T: Serialize>(path: P, records: &[T]) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}
