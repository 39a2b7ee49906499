//! Competitive-equilibrium solver for double-auction valuation schedules.
//!
//! Walks the Marshallian path over the aggregate demand and supply ladders
//! (buyer valuations descending, seller costs ascending) and stops at the
//! first candidate price with non-negative excess demand. The result is the
//! theoretical benchmark every realized period is measured against.

use std::fmt;

/// Competitive equilibrium of one market configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equilibrium {
    pub price: f64,
    pub quantity: usize,
    pub surplus: f64,
    pub buyer_surplus: f64,
    pub seller_surplus: f64,
}

impl Equilibrium {
    /// A zero component means the schedules technically cross but no real
    /// gains from trade exist; such schedules must be regenerated or rejected.
    pub fn is_degenerate(&self) -> bool {
        self.quantity == 0 || self.surplus <= 0.0 || self.price <= 0.0
    }
}

impl fmt::Display for Equilibrium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p*={:.2} q*={} surplus={:.2} (buyers {:.2} / sellers {:.2})",
            self.price, self.quantity, self.surplus, self.buyer_surplus, self.seller_surplus
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquilibriumError {
    /// One side of the market has no valuations at all.
    EmptySide,
    /// The Marshallian path exhausted without excess demand turning
    /// non-negative; the buy and sell schedules are inconsistent.
    Infeasible,
}

impl fmt::Display for EquilibriumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquilibriumError::EmptySide => {
                write!(f, "valuation schedule has an empty market side")
            }
            EquilibriumError::Infeasible => {
                write!(f, "no crossing point exists for the given valuation schedules")
            }
        }
    }
}

impl std::error::Error for EquilibriumError {}

/// Units demanded at `price`: aggregate buyer valuations `>= price`.
/// `valuations` must be sorted descending.
pub fn demand_at(price: f64, valuations: &[f64]) -> usize {
    valuations.iter().take_while(|&&v| v >= price).count()
}

/// Units supplied at `price`: aggregate seller costs `<= price`.
/// `costs` must be sorted ascending.
pub fn supply_at(price: f64, costs: &[f64]) -> usize {
    costs.iter().take_while(|&&c| c <= price).count()
}

/// Excess demand at `price`, the quantity the demand side overhangs supply.
pub fn excess_demand(price: f64, valuations: &[f64], costs: &[f64]) -> i64 {
    demand_at(price, valuations) as i64 - supply_at(price, costs) as i64
}

/// Solves for the competitive equilibrium of the aggregate schedules.
///
/// `all_buy` holds every buyer unit valuation sorted descending, `all_sell`
/// every seller unit cost sorted ascending. Surplus sums pairwise over the
/// full equilibrium quantity, so every unit sharing the crossing price
/// counts; units past the shorter ladder never enter the walk.
pub fn solve(all_buy: &[f64], all_sell: &[f64]) -> Result<Equilibrium, EquilibriumError> {
    if all_buy.is_empty() || all_sell.is_empty() {
        return Err(EquilibriumError::EmptySide);
    }

    for &buy in all_buy.iter().take(all_sell.len()) {
        if excess_demand(buy, all_buy, all_sell) >= 0 {
            let price = buy;
            let quantity = demand_at(price, all_buy).min(supply_at(price, all_sell));
            let surplus: f64 = all_buy[..quantity]
                .iter()
                .zip(&all_sell[..quantity])
                .map(|(v, c)| v - c)
                .sum();
            let buyer_surplus: f64 = all_buy[..quantity].iter().map(|v| v - price).sum();
            let seller_surplus: f64 = all_sell[..quantity].iter().map(|c| price - c).sum();
            return Ok(Equilibrium { price, quantity, surplus, buyer_surplus, seller_surplus });
        }
    }

    Err(EquilibriumError::Infeasible)
}

/// Theoretical surplus of a single buyer with the given unit ladder, were
/// every profitable unit to trade at the equilibrium price.
pub fn buyer_surplus_at(ladder: &[f64], price: f64) -> f64 {
    ladder.iter().map(|v| (v - price).max(0.0)).sum()
}

/// Theoretical surplus of a single seller at the equilibrium price.
pub fn seller_surplus_at(ladder: &[f64], price: f64) -> f64 {
    ladder.iter().map(|c| (price - c).max(0.0)).sum()
}
