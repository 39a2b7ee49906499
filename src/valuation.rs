//! Valuation schedules: per-trader reservation-price ladders and the
//! induced-value random generator used when a scenario carries no explicit
//! schedule.

use rand::Rng;
use rand::rngs::StdRng;

use crate::equilibrium::{self, Equilibrium, EquilibriumError};

/// Per-trader unit valuation ladders for one market configuration. Buyer
/// ladders are kept descending (marginal valuation falls with units held),
/// seller ladders ascending (marginal cost rises with units sold).
#[derive(Debug, Clone, PartialEq)]
pub struct ValuationSchedule {
    buyers: Vec<Vec<f64>>,
    sellers: Vec<Vec<f64>>,
}

impl ValuationSchedule {
    /// Builds a schedule from raw ladders, sorting each into its canonical
    /// order.
    pub fn new(mut buyers: Vec<Vec<f64>>, mut sellers: Vec<Vec<f64>>) -> Self {
        for ladder in &mut buyers {
            ladder.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        }
        for ladder in &mut sellers {
            ladder.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        }
        ValuationSchedule { buyers, sellers }
    }

    pub fn buyers(&self) -> &[Vec<f64>] {
        &self.buyers
    }

    pub fn sellers(&self) -> &[Vec<f64>] {
        &self.sellers
    }

    /// Aggregate demand ladder: every buyer unit valuation, descending.
    pub fn aggregate_demand(&self) -> Vec<f64> {
        let mut all: Vec<f64> = self.buyers.iter().flatten().copied().collect();
        all.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    /// Aggregate supply ladder: every seller unit cost, ascending.
    pub fn aggregate_supply(&self) -> Vec<f64> {
        let mut all: Vec<f64> = self.sellers.iter().flatten().copied().collect();
        all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    pub fn solve_equilibrium(&self) -> Result<Equilibrium, EquilibriumError> {
        equilibrium::solve(&self.aggregate_demand(), &self.aggregate_supply())
    }

    /// Generates a schedule by induced-value theory: each side shares one
    /// ladder of uniform integer limit prices, redrawn until the solved
    /// equilibrium is feasible and non-degenerate.
    pub fn generate(
        rng: &mut StdRng,
        total_buyers: usize,
        total_sellers: usize,
        commodities: usize,
        min_limit: f64,
        max_limit: f64,
    ) -> (Self, Equilibrium) {
        loop {
            let (ladder_buy, ladder_sell) = random_limit_prices(rng, commodities, min_limit, max_limit);
            let schedule = ValuationSchedule::new(
                vec![ladder_buy; total_buyers],
                vec![ladder_sell; total_sellers],
            );
            if let Ok(eq) = schedule.solve_equilibrium() {
                if !eq.is_degenerate() {
                    return (schedule, eq);
                }
            }
        }
    }
}

/// Draws one shared buyer ladder and one shared seller ladder of uniform
/// integer limit prices, redrawing until they admit a common crossing.
fn random_limit_prices(
    rng: &mut StdRng,
    commodities: usize,
    min_limit: f64,
    max_limit: f64,
) -> (Vec<f64>, Vec<f64>) {
    let lo = min_limit.round() as i64;
    let hi = max_limit.round() as i64;
    loop {
        let mut buy: Vec<f64> = (0..commodities).map(|_| rng.random_range(lo..=hi) as f64).collect();
        let mut sell: Vec<f64> = (0..commodities).map(|_| rng.random_range(lo..=hi) as f64).collect();
        buy.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        sell.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if is_valid_prices(&mut buy, &mut sell) {
            return (buy, sell);
        }
    }
}

/// Checks that at least one trade is possible and pins a common crossing
/// price inside the ladders so the equilibrium is unique. May nudge single
/// ladder entries to install that crossing.
fn is_valid_prices(buy: &mut [f64], sell: &mut [f64]) -> bool {
    let n = buy.len();
    if sell[0] >= buy[0] {
        return false;
    }
    if n == 1 {
        return true;
    }

    for c in 1..n {
        // once the buy ladder dips under the sell ladder no later unit can
        // trade; that index becomes the common equilibrium point
        if buy[c] <= sell[c] && c != n - 1 {
            if buy[c] >= sell[c - 1] {
                sell[c] = buy[c];
            } else if sell[c] <= buy[c - 1] {
                buy[c] = sell[c];
            } else {
                buy[c] = sell[c - 1];
                sell[c] = sell[c - 1];
            }
            return true;
        }
    }

    false
}
