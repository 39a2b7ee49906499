//! Scenario configuration: auction parameters, agent populations and
//! strategy parameter bundles, with JSON persistence and validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::agents::StrategyKind;

/// Full description of one auction experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub parameters: AuctionParameters,
    pub population: PopulationSpec,
    #[serde(default)]
    pub schedule: ScheduleSource,
    #[serde(default)]
    pub kaplan: KaplanParams,
    #[serde(default)]
    pub zip: ZipParams,
    /// Base seed for the run; replications derive their own from it.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Global auction parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuctionParameters {
    /// Lowest price any agent may ever quote.
    pub min_price: f64,
    /// Highest price any agent may ever quote.
    pub max_price: f64,
    /// Lower bound for randomly generated limit prices.
    pub min_limit: f64,
    /// Upper bound for randomly generated limit prices.
    pub max_limit: f64,
    /// Units per trader in randomly generated schedules.
    pub commodities: usize,
    pub periods: usize,
    /// Hard tick cap per period.
    pub total_time: usize,
    /// Per-agent per-tick participation probability.
    pub activation: f64,
}

impl Default for AuctionParameters {
    fn default() -> Self {
        AuctionParameters {
            min_price: 0.0,
            max_price: 200.0,
            min_limit: 50.0,
            max_limit: 150.0,
            commodities: 4,
            periods: 10,
            total_time: 300,
            activation: 1.0,
        }
    }
}

/// Strategy name -> trader count, per market side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopulationSpec {
    pub buyers: BTreeMap<String, usize>,
    pub sellers: BTreeMap<String, usize>,
}

impl PopulationSpec {
    pub fn total_buyers(&self) -> usize {
        self.buyers.values().sum()
    }

    pub fn total_sellers(&self) -> usize {
        self.sellers.values().sum()
    }

    /// Resolves one side's strategy names, in deterministic map order.
    pub fn resolve_side(side: &BTreeMap<String, usize>) -> Result<Vec<(StrategyKind, usize)>, String> {
        side.iter()
            .map(|(name, &count)| {
                StrategyKind::from_name(name)
                    .map(|kind| (kind, count))
                    .ok_or_else(|| format!("Unknown strategy name: {}", name))
            })
            .collect()
    }
}

/// Where the valuation schedule comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScheduleSource {
    /// Induced-value generation from `min_limit`/`max_limit`.
    #[default]
    Random,
    /// Explicit per-trader ladders. A single ladder per side is broadcast
    /// to every trader on that side.
    Explicit { buyers: Vec<Vec<f64>>, sellers: Vec<Vec<f64>> },
}

/// Kaplan sniping thresholds; each agent perturbs these by up to +-50%.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KaplanParams {
    pub spread_ratio: f64,
    pub profit_perc: f64,
    pub time_frac: f64,
}

impl Default for KaplanParams {
    fn default() -> Self {
        KaplanParams { spread_ratio: 0.1, profit_perc: 0.02, time_frac: 0.1 }
    }
}

/// ZIP parameter ranges, sampled once per agent. Defaults follow Cliff &
/// Bruten's reported settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZipParams {
    pub profit_margin_buyers: (f64, f64),
    pub profit_margin_sellers: (f64, f64),
    pub learning_rate: (f64, f64),
    pub momentum_coeff: (f64, f64),
    pub increasing_rel_target: (f64, f64),
    pub decreasing_rel_target: (f64, f64),
    pub increasing_abs_target: (f64, f64),
    pub decreasing_abs_target: (f64, f64),
}

impl Default for ZipParams {
    fn default() -> Self {
        ZipParams {
            profit_margin_buyers: (-0.35, -0.05),
            profit_margin_sellers: (0.05, 0.35),
            learning_rate: (0.1, 0.5),
            momentum_coeff: (0.2, 0.8),
            increasing_rel_target: (1.0, 1.05),
            decreasing_rel_target: (0.95, 1.0),
            increasing_abs_target: (0.0, 0.05),
            decreasing_abs_target: (-0.05, 0.0),
        }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        let mut population = PopulationSpec::default();
        population.buyers.insert("ZI_C".to_string(), 5);
        population.sellers.insert("ZI_C".to_string(), 5);
        Scenario {
            name: "default".to_string(),
            description: "Constrained zero-intelligence baseline market".to_string(),
            parameters: AuctionParameters::default(),
            population,
            schedule: ScheduleSource::Random,
            kaplan: KaplanParams::default(),
            zip: ZipParams::default(),
            seed: None,
        }
    }
}

impl Scenario {
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize scenario: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Failed to write scenario file: {}", e))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read scenario file: {}", e))?;
        serde_json::from_str(&json).map_err(|e| format!("Failed to parse scenario file: {}", e))
    }

    /// Checks the configuration before a run starts; every problem found
    /// here would otherwise surface as a mid-run failure.
    pub fn validate(&self) -> Result<(), String> {
        let p = &self.parameters;
        if self.name.is_empty() {
            return Err("Scenario name cannot be empty".to_string());
        }
        if p.periods == 0 {
            return Err("Number of periods must be at least 1".to_string());
        }
        if p.total_time == 0 {
            return Err("Period length (total_time) must be at least 1".to_string());
        }
        if p.commodities == 0 {
            return Err("Traders need at least one commodity".to_string());
        }
        if p.min_price >= p.max_price {
            return Err(format!(
                "Price bounds are inverted: min_price {} >= max_price {}",
                p.min_price, p.max_price
            ));
        }
        if p.min_limit >= p.max_limit {
            return Err(format!(
                "Limit price bounds are inverted: min_limit {} >= max_limit {}",
                p.min_limit, p.max_limit
            ));
        }
        if !(p.activation > 0.0 && p.activation <= 1.0) {
            return Err(format!("Activation probability {} must be in (0, 1]", p.activation));
        }
        if self.population.total_buyers() == 0 {
            return Err("Population needs at least one buyer".to_string());
        }
        if self.population.total_sellers() == 0 {
            return Err("Population needs at least one seller".to_string());
        }
        PopulationSpec::resolve_side(&self.population.buyers)?;
        PopulationSpec::resolve_side(&self.population.sellers)?;
        self.validate_strategy_params()?;
        self.validate_schedule()
    }

    fn validate_strategy_params(&self) -> Result<(), String> {
        if self.kaplan.spread_ratio < 0.0
            || self.kaplan.profit_perc < 0.0
            || self.kaplan.time_frac < 0.0
        {
            return Err("Kaplan parameters must be non-negative".to_string());
        }
        let ranges = [
            ("profit_margin_buyers", self.zip.profit_margin_buyers),
            ("profit_margin_sellers", self.zip.profit_margin_sellers),
            ("learning_rate", self.zip.learning_rate),
            ("momentum_coeff", self.zip.momentum_coeff),
            ("increasing_rel_target", self.zip.increasing_rel_target),
            ("decreasing_rel_target", self.zip.decreasing_rel_target),
            ("increasing_abs_target", self.zip.increasing_abs_target),
            ("decreasing_abs_target", self.zip.decreasing_abs_target),
        ];
        for (name, (lo, hi)) in ranges {
            if lo > hi {
                return Err(format!("ZIP range {} is inverted: ({}, {})", name, lo, hi));
            }
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<(), String> {
        let ScheduleSource::Explicit { buyers, sellers } = &self.schedule else {
            return Ok(());
        };
        if buyers.is_empty() || sellers.is_empty() {
            return Err("Explicit schedule must cover both market sides".to_string());
        }
        for (side, ladders, total) in [
            ("buyer", buyers, self.population.total_buyers()),
            ("seller", sellers, self.population.total_sellers()),
        ] {
            if ladders.len() != 1 && ladders.len() != total {
                return Err(format!(
                    "Explicit {} schedule has {} ladders for {} traders",
                    side,
                    ladders.len(),
                    total
                ));
            }
            for ladder in ladders {
                if ladder.is_empty() {
                    return Err(format!("Explicit {} schedule contains an empty ladder", side));
                }
                for &v in ladder {
                    if v < self.parameters.min_price || v > self.parameters.max_price {
                        return Err(format!(
                            "Explicit {} valuation {} is outside the price bounds [{}, {}]",
                            side, v, self.parameters.min_price, self.parameters.max_price
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenario: {}", self.name)?;
        writeln!(f, "  {}", self.description)?;
        writeln!(
            f,
            "  Periods: {}, ticks per period: {}, activation: {:.2}",
            self.parameters.periods, self.parameters.total_time, self.parameters.activation
        )?;
        writeln!(
            f,
            "  Price bounds: [{}, {}]",
            self.parameters.min_price, self.parameters.max_price
        )?;
        writeln!(f, "  Buyers:")?;
        for (name, count) in &self.population.buyers {
            writeln!(f, "    {} x {}", count, name)?;
        }
        writeln!(f, "  Sellers:")?;
        for (name, count) in &self.population.sellers {
            writeln!(f, "    {} x {}", count, name)?;
        }
        Ok(())
    }
}

fn population(buyers: &[(&str, usize)], sellers: &[(&str, usize)]) -> PopulationSpec {
    let mut spec = PopulationSpec::default();
    for &(name, count) in buyers {
        spec.buyers.insert(name.to_string(), count);
    }
    for &(name, count) in sellers {
        spec.sellers.insert(name.to_string(), count);
    }
    spec
}

/// Predefined scenarios covering the classic strategy line-ups.
pub fn create_standard_scenarios() -> HashMap<String, Scenario> {
    let mut scenarios = HashMap::new();

    scenarios.insert(
        "zic_baseline".to_string(),
        Scenario {
            name: "zic_baseline".to_string(),
            description: "Budget-constrained zero-intelligence traders on both sides".to_string(),
            population: population(&[("ZI_C", 5)], &[("ZI_C", 5)]),
            ..Scenario::default()
        },
    );

    scenarios.insert(
        "zi_unconstrained".to_string(),
        Scenario {
            name: "zi_unconstrained".to_string(),
            description: "Unconstrained zero-intelligence traders; efficiency suffers from loss-making trades".to_string(),
            population: population(&[("ZI", 5)], &[("ZI", 5)]),
            ..Scenario::default()
        },
    );

    scenarios.insert(
        "kaplan_vs_zic".to_string(),
        Scenario {
            name: "kaplan_vs_zic".to_string(),
            description: "A minority of Kaplan snipers trading against a ZI-C crowd".to_string(),
            population: population(&[("KAPLAN", 2), ("ZI_C", 4)], &[("KAPLAN", 2), ("ZI_C", 4)]),
            ..Scenario::default()
        },
    );

    scenarios.insert(
        "zip_convergence".to_string(),
        Scenario {
            name: "zip_convergence".to_string(),
            description: "Adaptive ZIP traders on both sides; prices converge over periods".to_string(),
            population: population(&[("ZIP", 6)], &[("ZIP", 6)]),
            parameters: AuctionParameters { periods: 15, ..AuctionParameters::default() },
            ..Scenario::default()
        },
    );

    scenarios.insert(
        "mixed_market".to_string(),
        Scenario {
            name: "mixed_market".to_string(),
            description: "All four strategies competing in one market".to_string(),
            population: population(
                &[("ZI", 2), ("ZI_C", 2), ("KAPLAN", 2), ("ZIP", 2)],
                &[("ZI", 2), ("ZI_C", 2), ("KAPLAN", 2), ("ZIP", 2)],
            ),
            parameters: AuctionParameters { activation: 0.5, ..AuctionParameters::default() },
            ..Scenario::default()
        },
    );

    scenarios.insert(
        "two_by_two".to_string(),
        Scenario {
            name: "two_by_two".to_string(),
            description: "Minimal market with a single crossing configuration".to_string(),
            population: population(&[("ZI_C", 2)], &[("ZI_C", 2)]),
            parameters: AuctionParameters {
                min_price: 0.0,
                max_price: 20.0,
                min_limit: 0.0,
                max_limit: 20.0,
                commodities: 1,
                periods: 1,
                total_time: 50,
                activation: 1.0,
            },
            schedule: ScheduleSource::Explicit {
                buyers: vec![vec![10.0], vec![8.0]],
                sellers: vec![vec![4.0], vec![6.0]],
            },
            ..Scenario::default()
        },
    );

    scenarios
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_validates() {
        assert!(Scenario::default().validate().is_ok());
    }

    #[test]
    fn standard_scenarios_all_validate() {
        for (name, scenario) in create_standard_scenarios() {
            assert!(scenario.validate().is_ok(), "scenario {} failed validation", name);
            assert_eq!(scenario.name, name);
        }
    }

    #[test]
    fn inverted_price_bounds_are_rejected() {
        let mut scenario = Scenario::default();
        scenario.parameters.min_price = 50.0;
        scenario.parameters.max_price = 10.0;
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("inverted"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut scenario = Scenario::default();
        scenario.population.buyers.insert("GD".to_string(), 2);
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("Unknown strategy"));
    }

    #[test]
    fn activation_outside_unit_interval_is_rejected() {
        let mut scenario = Scenario::default();
        scenario.parameters.activation = 0.0;
        assert!(scenario.validate().is_err());
        scenario.parameters.activation = 1.5;
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn empty_side_is_rejected() {
        let mut scenario = Scenario::default();
        scenario.population.sellers.clear();
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("seller"));
    }

    #[test]
    fn explicit_schedule_ladder_count_must_match_population() {
        let mut scenario = Scenario::default();
        scenario.schedule = ScheduleSource::Explicit {
            buyers: vec![vec![10.0], vec![8.0]],
            sellers: vec![vec![4.0]],
        };
        // five traders per side but only two buyer ladders
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("ladders"));
    }

    #[test]
    fn explicit_schedule_outside_price_bounds_is_rejected() {
        let mut scenario = Scenario::default();
        scenario.parameters.max_price = 20.0;
        scenario.schedule = ScheduleSource::Explicit {
            buyers: vec![vec![25.0]],
            sellers: vec![vec![4.0]],
        };
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("outside the price bounds"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let scenario = create_standard_scenarios().remove("two_by_two").unwrap();
        let path = std::env::temp_dir().join("auction_model_scenario_test.json");
        scenario.save_to_file(&path).unwrap();
        let loaded = Scenario::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.name, scenario.name);
        assert_eq!(loaded.schedule, scenario.schedule);
        assert_eq!(loaded.parameters.total_time, 50);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn population_resolves_to_strategy_kinds() {
        let scenario = create_standard_scenarios().remove("mixed_market").unwrap();
        let buyers = PopulationSpec::resolve_side(&scenario.population.buyers).unwrap();
        assert_eq!(buyers.len(), 4);
        assert_eq!(buyers.iter().map(|(_, c)| c).sum::<usize>(), 8);
    }
}
