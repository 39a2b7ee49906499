//! Run output records: per-transaction, per-period, and per-agent rows
//! collected into a serializable log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Side;
use crate::metrics::SpearmanResult;

/// One executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub period: usize,
    pub tick: usize,
    pub price: f64,
    pub buyer_id: usize,
    pub seller_id: usize,
    pub buyer_valuation: f64,
    pub seller_valuation: f64,
    /// Squared deviation of this trade's price from the equilibrium price.
    pub squared_deviation: f64,
    /// Period surplus and quantity after this trade settled.
    pub running_surplus: f64,
    pub running_quantity: usize,
}

impl TransactionRecord {
    /// Joint gain from this trade, negative when a loss-making match cleared.
    pub fn surplus(&self) -> f64 {
        self.buyer_valuation - self.seller_valuation
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[p{} t{}] buyer {} bought from seller {} at {:.2} (valuations {:.2}/{:.2})",
            self.period,
            self.tick,
            self.buyer_id,
            self.seller_id,
            self.price,
            self.buyer_valuation,
            self.seller_valuation
        )
    }
}

/// Per-period aggregate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub period: usize,
    pub ticks_elapsed: usize,
    pub transactions: usize,
    pub traded_quantity: usize,
    pub realized_surplus: f64,
    pub efficiency: f64,
    pub trade_ratio: f64,
    /// Root mean squared deviation of trade prices from the equilibrium price.
    pub rmsd: f64,
    pub mean_price: f64,
    /// Spearman correlation of this period's matched valuations against the
    /// efficient trade order; absent with fewer than three trades.
    pub rank_correlation: Option<SpearmanResult>,
    /// True when the period hit the tick cap rather than running out of
    /// feasible trades.
    pub timed_out: bool,
}

impl fmt::Display for PeriodRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Period {}: {} trades in {} ticks, efficiency {:.3}, trade ratio {:.3}, rmsd {:.2}",
            self.period,
            self.transactions,
            self.ticks_elapsed,
            self.efficiency,
            self.trade_ratio,
            self.rmsd
        )
    }
}

/// One agent's outcome for one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPeriodRecord {
    pub period: usize,
    pub agent_id: usize,
    pub side: Side,
    pub strategy: String,
    pub units_traded: usize,
    pub surplus: f64,
    pub equilibrium_surplus: f64,
    pub profit_dispersion: f64,
}

/// Everything one run produced, with an envelope timestamp so saved logs
/// can be told apart. Records themselves carry no wall-clock data, so two
/// runs with the same seed serialize to identical record arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLog {
    pub scenario_name: String,
    pub seed: u64,
    pub generated_at: DateTime<Utc>,
    pub transactions: Vec<TransactionRecord>,
    pub periods: Vec<PeriodRecord>,
    pub agents: Vec<AgentPeriodRecord>,
}

impl RecordLog {
    pub fn new(scenario_name: &str, seed: u64) -> Self {
        RecordLog {
            scenario_name: scenario_name.to_string(),
            seed,
            generated_at: Utc::now(),
            transactions: Vec::new(),
            periods: Vec::new(),
            agents: Vec::new(),
        }
    }

    pub fn transactions_in_period(&self, period: usize) -> impl Iterator<Item = &TransactionRecord> {
        self.transactions.iter().filter(move |t| t.period == period)
    }

    pub fn save_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &str) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let log = serde_json::from_str(&json)?;
        Ok(log)
    }
}
