use auction_model::auction::CdaAuction;
use auction_model::cli::{self, CliArgs, Command};
use auction_model::experiment::ExperimentBatch;
use auction_model::scenario::{Scenario, create_standard_scenarios};

fn main() {
    env_logger::init();

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    let exit_code = match &args.command {
        Command::Run => run_single(&args),
        Command::Batch { config } => run_batch(config),
        Command::Scenarios => {
            list_scenarios();
            0
        }
    };
    std::process::exit(exit_code);
}

fn run_single(args: &CliArgs) -> i32 {
    let mut scenario = if let Some(path) = &args.scenario_file {
        match Scenario::load_from_file(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        match create_standard_scenarios().remove(&args.scenario_name) {
            Some(s) => s,
            None => {
                eprintln!(
                    "Unknown scenario '{}'. Use the scenarios command to list them.",
                    args.scenario_name
                );
                return 1;
            }
        }
    };

    cli::apply_overrides(&mut scenario, args);
    let seed = scenario.seed.unwrap_or_else(rand::random);

    if !args.quiet {
        println!("{}", scenario);
        println!("Seed: {}", seed);
    }

    let auction = match CdaAuction::new(scenario, seed) {
        Ok(auction) => auction,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let summary = auction.run();

    if !args.quiet {
        println!("{}", summary);
        if args.verbose {
            for period in &summary.log.periods {
                println!("  {}", period);
            }
            for transaction in &summary.log.transactions {
                println!("    {}", transaction);
            }
        }
    }

    if let Some(output) = &args.output_file {
        let path = output.to_string_lossy();
        match summary.log.save_to_file(&path) {
            Ok(()) => {
                if !args.quiet {
                    println!("Records written to {}", path);
                }
            }
            Err(e) => {
                eprintln!("Error writing records to {}: {}", path, e);
                return 1;
            }
        }
    }

    0
}

fn run_batch(config: &std::path::Path) -> i32 {
    let batch = match ExperimentBatch::load_from_file(config) {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("Batch '{}': {} experiments", batch.name, batch.experiments.len());
    let results = batch.run();

    let mut failed = 0;
    for result in &results {
        println!("{}", result);
        failed += result.failures();
    }

    if failed > 0 {
        eprintln!("{} replications failed", failed);
        return 1;
    }
    0
}

fn list_scenarios() {
    let scenarios = create_standard_scenarios();
    let mut names: Vec<_> = scenarios.keys().collect();
    names.sort();
    println!("Built-in scenarios:");
    for name in names {
        let scenario = &scenarios[name];
        println!("  {:<18} {}", name, scenario.description);
    }
}
