//! Command-line interface for the auction simulator.

use crate::scenario::Scenario;
use lexopt::prelude::*;
use std::path::PathBuf;

/// Parsed command-line arguments.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
    pub scenario_name: String,
    pub scenario_file: Option<PathBuf>,
    pub seed: Option<u64>,
    pub periods: Option<usize>,
    pub total_time: Option<usize>,
    pub activation: Option<f64>,
    pub quiet: bool,
    pub verbose: bool,
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Run,
    Batch { config: PathBuf },
    Scenarios,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::Run,
            scenario_name: "zic_baseline".to_string(),
            scenario_file: None,
            seed: None,
            periods: None,
            total_time: None,
            activation: None,
            quiet: false,
            verbose: false,
            output_file: None,
        }
    }
}

pub fn parse_args() -> Result<CliArgs, lexopt::Error> {
    let mut args = lexopt::Parser::from_env();
    let mut cli_args = CliArgs::default();
    let mut subcommand = None;
    let mut batch_config = None;

    while let Some(arg) = args.next()? {
        match arg {
            Value(val) => {
                let val_str = val.string()?;
                if subcommand.is_none() {
                    subcommand = Some(val_str);
                } else if subcommand.as_deref() == Some("batch") {
                    batch_config = Some(PathBuf::from(val_str));
                }
            }
            Long("scenario") => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.scenario_name = val.string()?;
                }
            }
            Long("scenario-file") => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.scenario_file = Some(PathBuf::from(val.string()?));
                }
            }
            Long("seed") => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.seed = Some(val.parse()?);
                }
            }
            Long("periods") | Short('p') => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.periods = Some(val.parse()?);
                }
            }
            Long("total-time") | Short('t') => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.total_time = Some(val.parse()?);
                }
            }
            Long("activation") => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.activation = Some(val.parse()?);
                }
            }
            Long("output") | Short('o') => {
                if let Some(Value(val)) = args.next()? {
                    cli_args.output_file = Some(PathBuf::from(val.string()?));
                }
            }
            Long("quiet") | Short('q') => cli_args.quiet = true,
            Long("verbose") | Short('v') => cli_args.verbose = true,
            Long("help") | Short('h') => {
                print_help();
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    cli_args.command = match subcommand.as_deref() {
        Some("run") | None => Command::Run,
        Some("batch") => {
            if let Some(config) = batch_config {
                Command::Batch { config }
            } else {
                eprintln!("Error: batch command requires a configuration file");
                std::process::exit(1);
            }
        }
        Some("scenarios") => Command::Scenarios,
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_help();
            std::process::exit(1);
        }
    };

    Ok(cli_args)
}

/// Applies CLI overrides to a loaded scenario.
pub fn apply_overrides(scenario: &mut Scenario, args: &CliArgs) {
    if let Some(periods) = args.periods {
        scenario.parameters.periods = periods;
    }
    if let Some(total_time) = args.total_time {
        scenario.parameters.total_time = total_time;
    }
    if let Some(activation) = args.activation {
        scenario.parameters.activation = activation;
    }
    if let Some(seed) = args.seed {
        scenario.seed = Some(seed);
    }
}

fn print_help() {
    println!("\nContinuous Double Auction Simulator\n");
    println!("USAGE:");
    println!("    auction-model-sim [COMMAND] [OPTIONS]\n");

    println!("COMMANDS:");
    println!("    run              Run a single scenario (default)");
    println!("    batch CONFIG     Run batch experiments from YAML config");
    println!("    scenarios        List the built-in scenarios\n");

    println!("OPTIONS:");
    println!("    --scenario <NAME>         Use a built-in scenario (default: zic_baseline)");
    println!("    --scenario-file <FILE>    Load scenario from JSON file");
    println!("    --seed <N>                Random seed for reproducible runs");
    println!("    -p, --periods <N>         Number of trading periods");
    println!("    -t, --total-time <N>      Ticks per trading period");
    println!("    --activation <P>          Per-tick agent participation probability");
    println!("    -o, --output <FILE>       Write run records to a JSON file");
    println!("    -q, --quiet               Suppress non-essential output");
    println!("    -v, --verbose             Enable verbose output");
    println!("    -h, --help                Print help information\n");

    println!("EXAMPLES:");
    println!("    # Run the mixed-strategy market with a fixed seed");
    println!("    auction-model-sim run --scenario mixed_market --seed 12345\n");

    println!("    # Short ZIP convergence run with records saved");
    println!("    auction-model-sim run --scenario zip_convergence -p 5 -o records.json\n");

    println!("    # Batch of replicated experiments");
    println!("    auction-model-sim batch experiments.yaml");
}
