//! Monthly referral runner
//!
//! Loads the experiment's tables, solves every month and writes referral,
//! unsheltered and utilization tables.
//!
//! Usage:
//!   cargo run --release --bin referrals -- referrals/experiments/toronto_downtown.toml

use referrals::config::ExperimentConfig;
use referrals::output::{OutputMetadata, ReferralOutput};
use referrals::runner::{FlowRecord, ReferralRun, ShortfallRecord, run_referrals};
use referrals::tables::load_from_paths;
use referrals::telemetry::init_tracing;
use std::env;
use std::time::Instant;

const PREVIEW_ROWS: usize = 10;

fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <experiment_config.toml>", args[0]);
        eprintln!("Example: {} referrals/experiments/toronto_downtown.toml", args[0]);
        std::process::exit(1);
    }

    let config_path = &args[1];
    println!("=== Shelter Referral Runner ===\n");
    println!("Loading experiment config: {}\n", config_path);

    let config = ExperimentConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    println!("Experiment: {}", config.experiment.name);
    if !config.experiment.description.is_empty() {
        println!("Description: {}", config.experiment.description);
    }

    let tables = load_from_paths(&config.tables.schema, &config.table_paths()).unwrap_or_else(|e| {
        eprintln!("Error loading tables: {}", e);
        std::process::exit(1);
    });
    println!(
        "Network: {} hotspots, {} shelters ({:.0} beds), {} reachable pairs, {} periods\n",
        tables.network.hotspots().len(),
        tables.network.shelters().len(),
        tables.network.total_capacity(),
        tables.network.num_reachable_pairs(),
        tables.periods.len()
    );

    let start_time = Instant::now();
    let run = run_referrals(&tables.network, &tables.periods, &config.runner_options());
    print_previews(&run);

    let output = ReferralOutput::from_run(&run, OutputMetadata::new(&config, None));
    let output_dir = config.output_dir();
    if let Err(e) = output.write_all(&output_dir, &config.output) {
        eprintln!("Error writing results: {}", e);
        std::process::exit(1);
    }

    print_totals(&run);
    println!(
        "\n✓ {} of {} periods solved in {:.1}s",
        run.periods.len(),
        tables.periods.len(),
        start_time.elapsed().as_secs_f64()
    );
    println!("Results saved to: {}", output_dir.display());

    if let Some(failure) = &run.failure {
        eprintln!(
            "\nPeriod {} ({}) failed: {}",
            failure.period, failure.label, failure.error
        );
        std::process::exit(1);
    }
}

fn print_previews(run: &ReferralRun) {
    for result in &run.periods {
        println!("\n{} PERIOD {} DECISIONS {}", "=".repeat(20), result.label, "=".repeat(20));

        let flows: Vec<&FlowRecord> = run.flows.iter().filter(|f| f.period == result.period).collect();
        if flows.is_empty() {
            println!("No assignments made.");
        } else {
            println!("\n--- Top {} Assignments (Total Moves: {}) ---", PREVIEW_ROWS, flows.len());
            println!("{:<12} {:<8} {:<10} {:>8} {:>10}", "Hotspot", "Shelter", "Category", "People", "Distance");
            for flow in flows.iter().take(PREVIEW_ROWS) {
                println!(
                    "{:<12} {:<8} {:<10} {:>8} {:>10.2}",
                    flow.hotspot, flow.shelter, flow.category, flow.people, flow.distance
                );
            }
        }

        let mut unsheltered: Vec<&ShortfallRecord> =
            run.shortfalls.iter().filter(|s| s.period == result.period).collect();
        if unsheltered.is_empty() {
            println!("Everyone was housed!");
        } else {
            unsheltered.sort_by(|a, b| b.people.cmp(&a.people));
            println!(
                "\n--- Top {} Unsheltered Locations (Total Locations: {}) ---",
                PREVIEW_ROWS,
                unsheltered.len()
            );
            println!("{:<12} {:<10} {:>18}", "Hotspot", "Category", "People_Left_Behind");
            for shortfall in unsheltered.iter().take(PREVIEW_ROWS) {
                println!("{:<12} {:<10} {:>18}", shortfall.hotspot, shortfall.category, shortfall.people);
            }
        }

        println!(
            "\nServed {:.0}, unsheltered {:.0}, average distance {:.2}",
            result.total_served, result.total_shortfall, result.average_distance
        );
    }
}

fn print_totals(run: &ReferralRun) {
    let served: f64 = run.periods.iter().map(|p| p.total_served).sum();
    let unsheltered: f64 = run.periods.iter().map(|p| p.total_shortfall).sum();
    let distance: f64 = run.periods.iter().map(|p| p.total_distance).sum();

    println!("\n=== Totals ===\n");
    println!("  Referrals recorded: {}", run.flows.len());
    println!("  People served: {:.0}", served);
    println!("  People unsheltered: {:.0}", unsheltered);
    println!("  Total distance: {:.1}", distance);
}
