//! Batch runner: Monte Carlo replications of one or more scenarios with
//! derived seeds, optional thread-pooled execution, and cross-replication
//! aggregation.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::auction::CdaAuction;
use crate::metrics::SummaryStat;
use crate::scenario::{Scenario, create_standard_scenarios};

/// Configuration for a batch of experiments, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBatch {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parallel: Option<usize>,
    pub experiments: Vec<ExperimentConfig>,
}

/// One experiment: a scenario run `replications` times with seeds derived
/// from `base_seed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    /// Named standard scenario, used when no file is given.
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub scenario_file: Option<PathBuf>,
    #[serde(default = "default_replications")]
    pub replications: usize,
    #[serde(default)]
    pub base_seed: u64,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_replications() -> usize {
    1
}

/// Outcome of one replication. A failed setup marks the replication and
/// the batch carries on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationResult {
    pub replication: usize,
    pub seed: u64,
    pub success: bool,
    pub error: Option<String>,
    pub efficiency: f64,
    pub trade_ratio: f64,
    pub rmsd: f64,
    pub transactions: usize,
}

/// Aggregate over all successful replications of one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub name: String,
    pub replications: Vec<ReplicationResult>,
    pub efficiency: SummaryStat,
    pub trade_ratio: SummaryStat,
    pub rmsd: SummaryStat,
    /// Mean per-period surplus by strategy name, across replications.
    pub strategy_surplus: BTreeMap<String, SummaryStat>,
    pub duration_ms: u64,
}

impl ExperimentResult {
    pub fn failures(&self) -> usize {
        self.replications.iter().filter(|r| !r.success).count()
    }
}

impl std::fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Experiment '{}': {} replications ({} failed) in {} ms",
            self.name,
            self.replications.len(),
            self.failures(),
            self.duration_ms
        )?;
        writeln!(f, "  Efficiency:  {}", self.efficiency)?;
        writeln!(f, "  Trade ratio: {}", self.trade_ratio)?;
        writeln!(f, "  Price RMSD:  {}", self.rmsd)?;
        for (strategy, stat) in &self.strategy_surplus {
            writeln!(f, "  Surplus[{}]: {}", strategy, stat)?;
        }
        Ok(())
    }
}

impl ExperimentBatch {
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read experiment file: {}", e))?;
        serde_yaml::from_str(&contents).map_err(|e| format!("Failed to parse YAML: {}", e))
    }

    /// Runs every experiment, optionally with a fixed-size thread pool.
    pub fn run(&self) -> Vec<ExperimentResult> {
        let parallel = self.parallel.unwrap_or(1);

        if parallel <= 1 {
            return self.experiments.iter().map(run_experiment).collect();
        }

        let results = Arc::new(Mutex::new(Vec::new()));
        let slots = Arc::new(Mutex::new(parallel));
        let mut handles = vec![];

        for (index, exp) in self.experiments.iter().enumerate() {
            let exp = exp.clone();
            let results = Arc::clone(&results);
            let slots = Arc::clone(&slots);

            handles.push(thread::spawn(move || {
                loop {
                    let mut free = slots.lock().unwrap();
                    if *free > 0 {
                        *free -= 1;
                        break;
                    }
                    drop(free);
                    thread::sleep(std::time::Duration::from_millis(50));
                }

                let result = run_experiment(&exp);
                results.lock().unwrap().push((index, result));
                *slots.lock().unwrap() += 1;
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut indexed = Arc::try_unwrap(results).unwrap().into_inner().unwrap();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

fn resolve_scenario(config: &ExperimentConfig) -> Result<Scenario, String> {
    if let Some(path) = &config.scenario_file {
        return Scenario::load_from_file(path);
    }
    if let Some(name) = &config.scenario {
        return create_standard_scenarios()
            .remove(name)
            .ok_or_else(|| format!("Unknown standard scenario: {}", name));
    }
    Err(format!("Experiment '{}' names no scenario", config.name))
}

/// Runs all replications of one experiment and aggregates them.
pub fn run_experiment(config: &ExperimentConfig) -> ExperimentResult {
    let start = std::time::Instant::now();
    info!("experiment '{}': {} replications", config.name, config.replications);

    let mut replications = Vec::with_capacity(config.replications);
    let mut strategy_values: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for replication in 0..config.replications.max(1) {
        let seed = config.base_seed.wrapping_add(replication as u64);
        let result = match resolve_scenario(config).map_err(|e| e.to_string()).and_then(|scenario| {
            CdaAuction::new(scenario, seed).map_err(|e| e.to_string())
        }) {
            Ok(auction) => {
                let summary = auction.run();
                if let Some(output) = &config.output {
                    let path = replication_output_path(output, replication);
                    if let Err(e) = summary.log.save_to_file(&path) {
                        warn!("could not write records to {}: {}", path, e);
                    }
                }
                for record in &summary.log.agents {
                    strategy_values
                        .entry(record.strategy.clone())
                        .or_default()
                        .push(record.surplus);
                }
                ReplicationResult {
                    replication,
                    seed,
                    success: true,
                    error: None,
                    efficiency: summary.metrics.efficiency.mean,
                    trade_ratio: summary.metrics.trade_ratio.mean,
                    rmsd: summary.metrics.rmsd.mean,
                    transactions: summary.metrics.total_transactions,
                }
            }
            Err(error) => {
                warn!("replication {} of '{}' failed: {}", replication, config.name, error);
                ReplicationResult {
                    replication,
                    seed,
                    success: false,
                    error: Some(error),
                    efficiency: 0.0,
                    trade_ratio: 0.0,
                    rmsd: 0.0,
                    transactions: 0,
                }
            }
        };
        replications.push(result);
    }

    let ok: Vec<&ReplicationResult> = replications.iter().filter(|r| r.success).collect();
    let efficiencies: Vec<f64> = ok.iter().map(|r| r.efficiency).collect();
    let ratios: Vec<f64> = ok.iter().map(|r| r.trade_ratio).collect();
    let rmsds: Vec<f64> = ok.iter().map(|r| r.rmsd).collect();

    let strategy_surplus = strategy_values
        .into_iter()
        .map(|(strategy, values)| (strategy, SummaryStat::from_values(&values)))
        .collect();

    ExperimentResult {
        name: config.name.clone(),
        replications,
        efficiency: SummaryStat::from_values(&efficiencies),
        trade_ratio: SummaryStat::from_values(&ratios),
        rmsd: SummaryStat::from_values(&rmsds),
        strategy_surplus,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// `results.json` becomes `results_r3.json` for replication 3.
fn replication_output_path(base: &Path, replication: usize) -> String {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("records");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let file = format!("{}_r{}.{}", stem, replication, ext);
    match base.parent() {
        Some(dir) if dir.as_os_str().is_empty() => file,
        Some(dir) => dir.join(file).to_string_lossy().into_owned(),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scenario: &str, replications: usize, base_seed: u64) -> ExperimentConfig {
        ExperimentConfig {
            name: format!("{}_test", scenario),
            scenario: Some(scenario.to_string()),
            scenario_file: None,
            replications,
            base_seed,
            output: None,
        }
    }

    #[test]
    fn replication_seeds_derive_from_base() {
        let result = run_experiment(&config("two_by_two", 3, 100));
        let seeds: Vec<u64> = result.replications.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
        assert_eq!(result.failures(), 0);
    }

    #[test]
    fn aggregates_cover_successful_replications() {
        let result = run_experiment(&config("two_by_two", 5, 1));
        assert_eq!(result.replications.len(), 5);
        assert!(result.efficiency.mean >= 0.0);
        assert!(result.efficiency.mean <= 1.0 + 1e-9);
        assert!(result.strategy_surplus.contains_key("ZI_C"));
    }

    #[test]
    fn unknown_scenario_marks_replications_failed() {
        let result = run_experiment(&config("no_such_scenario", 2, 1));
        assert_eq!(result.failures(), 2);
        assert!(result.replications[0].error.is_some());
    }

    #[test]
    fn batch_yaml_round_trip() {
        let batch = ExperimentBatch {
            name: "smoke".to_string(),
            description: "ZI-C baseline sweep".to_string(),
            parallel: Some(2),
            experiments: vec![config("zic_baseline", 2, 7)],
        };
        let yaml = serde_yaml::to_string(&batch).unwrap();
        let parsed: ExperimentBatch = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.name, "smoke");
        assert_eq!(parsed.experiments.len(), 1);
        assert_eq!(parsed.experiments[0].replications, 2);
    }

    #[test]
    fn parallel_batch_preserves_experiment_order() {
        let batch = ExperimentBatch {
            name: "ordered".to_string(),
            description: String::new(),
            parallel: Some(2),
            experiments: vec![
                config("two_by_two", 1, 1),
                config("two_by_two", 1, 2),
                config("two_by_two", 1, 3),
            ],
        };
        let results = batch.run();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].replications[0].seed, 1);
        assert_eq!(results[1].replications[0].seed, 2);
        assert_eq!(results[2].replications[0].seed, 3);
    }

    #[test]
    fn output_paths_carry_the_replication_index() {
        let path = replication_output_path(Path::new("out/results.json"), 4);
        assert_eq!(path, "out/results_r4.json");
        let bare = replication_output_path(Path::new("results.json"), 0);
        assert_eq!(bare, "results_r0.json");
    }
}
