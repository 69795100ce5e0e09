//! Heuristic policy evaluation
//!
//! Samples daily demand for one month and compares first-come-first-served
//! referral policies on identical days.
//!
//! Usage:
//!   cargo run --release --bin policy_eval -- referrals/experiments/toronto_downtown.toml

use referrals::config::ExperimentConfig;
use referrals::monte_carlo::{MetricSummary, evaluate_policies};
use referrals::output::{OutputMetadata, PolicyOutput};
use referrals::tables::{load_from_paths, monthly_rates};
use referrals::telemetry::init_tracing;
use std::env;
use std::time::Instant;

fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <experiment_config.toml>", args[0]);
        eprintln!("Example: {} referrals/experiments/toronto_downtown.toml", args[0]);
        std::process::exit(1);
    }

    let config_path = &args[1];
    println!("=== Referral Policy Evaluation ===\n");
    println!("Loading experiment config: {}\n", config_path);

    let config = ExperimentConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    let mc_config = config.monte_carlo_config().unwrap_or_else(|e| {
        eprintln!("Error in config: {}", e);
        std::process::exit(1);
    });
    let allocators = config.allocators().unwrap_or_else(|e| {
        eprintln!("Error in config: {}", e);
        std::process::exit(1);
    });

    let tables = load_from_paths(&config.tables.schema, &config.table_paths()).unwrap_or_else(|e| {
        eprintln!("Error loading tables: {}", e);
        std::process::exit(1);
    });
    let rates = match config.monthly_rates(&tables.network) {
        Ok(Some(rates)) => rates,
        Ok(None) => monthly_rates(&tables.network, &tables.periods),
        Err(e) => {
            eprintln!("Error in config: {}", e);
            std::process::exit(1);
        }
    };

    println!("Experiment: {}", config.experiment.name);
    println!(
        "Configuration: {} days of month {} from {} (seed={})",
        mc_config.n_days, mc_config.month_index, mc_config.origin, mc_config.seed
    );
    if let Some(month) = rates.get(mc_config.month_index) {
        for (category, total) in month {
            println!("  {}: {:.0} per month", category, total);
        }
    }
    println!();

    let start_time = Instant::now();
    let evaluation = evaluate_policies(&tables.network, &rates, &allocators, &mc_config).unwrap_or_else(|e| {
        eprintln!("Error evaluating policies: {}", e);
        std::process::exit(1);
    });

    let output = PolicyOutput::new(evaluation, OutputMetadata::new(&config, Some(mc_config.seed)));
    for summary in &output.summaries {
        println!("Heuristic: {}", summary.name);
        print_metric("sheltered", &summary.sheltered);
        print_metric("unsheltered", &summary.unsheltered);
        print_metric("total distance", &summary.total_distance);
        println!();
    }

    let output_dir = config.output_dir();
    if let Err(e) = output.write_all(&output_dir, &config.output) {
        eprintln!("Error writing results: {}", e);
        std::process::exit(1);
    }

    println!(
        "✓ Evaluation complete in {:.1}s",
        start_time.elapsed().as_secs_f64()
    );
    println!("Results saved to: {}", output_dir.display());
}

fn print_metric(label: &str, m: &MetricSummary) {
    println!(
        "  avg {}: {:.2} ± {:.2} (p10 {:.1}, p50 {:.1}, p90 {:.1})",
        label, m.mean, m.std_dev, m.p10, m.p50, m.p90
    );
}
