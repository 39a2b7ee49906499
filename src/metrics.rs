//! Performance measures for completed runs: allocative efficiency, trade
//! ratio, price deviation, transaction-order correlation, and
//! cross-replication aggregates.

use serde::{Deserialize, Serialize};

use crate::equilibrium::Equilibrium;
use crate::records::{PeriodRecord, TransactionRecord};

/// Realized surplus as a fraction of the competitive-equilibrium surplus.
/// Can exceed 1.0 only when unconstrained traders clear loss-making pairs
/// elsewhere, so values above 1 are left uncapped for diagnosis.
pub fn allocative_efficiency(realized_surplus: f64, equilibrium: &Equilibrium) -> f64 {
    if equilibrium.surplus == 0.0 {
        return 0.0;
    }
    realized_surplus / equilibrium.surplus
}

/// Traded units relative to the equilibrium quantity.
pub fn trade_ratio(traded_quantity: usize, equilibrium: &Equilibrium) -> f64 {
    if equilibrium.quantity == 0 {
        return 0.0;
    }
    traded_quantity as f64 / equilibrium.quantity as f64
}

/// Root mean squared deviation of transaction prices from the equilibrium
/// price. Zero when no trades occurred.
pub fn price_rmsd(prices: &[f64], equilibrium: &Equilibrium) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = prices.iter().map(|p| (p - equilibrium.price).powi(2)).sum();
    (sum_sq / prices.len() as f64).sqrt()
}

/// Squared gap between an agent's realized and equilibrium surplus.
pub fn profit_dispersion(surplus: f64, equilibrium_surplus: f64) -> f64 {
    (surplus - equilibrium_surplus).powi(2)
}

/// Spearman rank correlation with a two-sided p-value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpearmanResult {
    pub rho: f64,
    pub p_value: f64,
}

/// How closely the realized transaction order tracks the efficient order.
///
/// High-value buyers and low-cost sellers should trade first. Buyer
/// valuations are ranked descending and seller valuations ascending, so a
/// perfectly efficient sequence yields rho 1.0 on both sides; the reported
/// rho correlates the two rank vectors against the transaction index.
pub fn transaction_order_correlation(transactions: &[TransactionRecord]) -> Option<SpearmanResult> {
    if transactions.len() < 3 {
        return None;
    }
    let buy_vals: Vec<f64> = transactions.iter().map(|t| t.buyer_valuation).collect();
    let sell_vals: Vec<f64> = transactions.iter().map(|t| t.seller_valuation).collect();
    let buy_ranks = average_ranks(&buy_vals, true);
    let sell_ranks = average_ranks(&sell_vals, false);
    spearman(&buy_ranks, &sell_ranks)
}

/// Average ranks (1-based) with ties sharing their mean rank.
/// `descending` ranks the largest value first.
fn average_ranks(values: &[f64], descending: bool) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let cmp = values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal);
        if descending { cmp.reverse() } else { cmp }
    });

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j hold tied values; each gets the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = mean_rank;
        }
        i = j + 1;
    }
    ranks
}

/// Pearson correlation of two rank vectors plus the usual t-approximation
/// for the two-sided p-value.
fn spearman(x_ranks: &[f64], y_ranks: &[f64]) -> Option<SpearmanResult> {
    let n = x_ranks.len();
    if n != y_ranks.len() || n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean_x = x_ranks.iter().sum::<f64>() / nf;
    let mean_y = y_ranks.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x_ranks[i] - mean_x;
        let dy = y_ranks[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    let rho = (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0);

    let p_value = if rho.abs() >= 1.0 {
        0.0
    } else {
        let df = nf - 2.0;
        let t = rho * (df / (1.0 - rho * rho)).sqrt();
        student_t_two_sided(t, df)
    };
    Some(SpearmanResult { rho, p_value })
}

/// Two-sided p-value of a Student-t statistic via the regularized
/// incomplete beta function.
fn student_t_two_sided(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    if x < 0.5 {
        // reflection formula
        return std::f64::consts::PI.ln() - (std::f64::consts::PI * x).sin().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = 0.99999999999980993;
    for (i, &c) in COEFFS.iter().enumerate() {
        a += c / (x + i as f64 + 1.0);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta I_x(a, b), continued fraction per Lentz.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - front * beta_cf(b, a, 1.0 - x) / b
    }
}

fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-12;
    const TINY: f64 = 1e-30;

    let mut c = 1.0;
    let mut d = 1.0 - (a + b) * x / (a + 1.0);
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let num = m * (b - m) * x / ((a + m2 - 1.0) * (a + m2));
        d = 1.0 + num * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + num / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let num = -(a + m) * (a + b + m) * x / ((a + m2) * (a + m2 + 1.0));
        d = 1.0 + num * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + num / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Mean and sample standard deviation across replications.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SummaryStat {
    pub mean: f64,
    pub std_dev: f64,
}

impl SummaryStat {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return SummaryStat::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = if values.len() > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        } else {
            0.0
        };
        SummaryStat { mean, std_dev }
    }
}

impl std::fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} (σ={:.3})", self.mean, self.std_dev)
    }
}

/// Cross-period aggregates for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub efficiency: SummaryStat,
    pub trade_ratio: SummaryStat,
    pub rmsd: SummaryStat,
    pub total_transactions: usize,
    pub order_correlation: Option<SpearmanResult>,
}

impl RunMetrics {
    pub fn from_records(periods: &[PeriodRecord], transactions: &[TransactionRecord]) -> Self {
        let efficiencies: Vec<f64> = periods.iter().map(|p| p.efficiency).collect();
        let ratios: Vec<f64> = periods.iter().map(|p| p.trade_ratio).collect();
        let rmsds: Vec<f64> = periods.iter().map(|p| p.rmsd).collect();
        RunMetrics {
            efficiency: SummaryStat::from_values(&efficiencies),
            trade_ratio: SummaryStat::from_values(&ratios),
            rmsd: SummaryStat::from_values(&rmsds),
            total_transactions: transactions.len(),
            order_correlation: transaction_order_correlation(transactions),
        }
    }
}

impl std::fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run metrics ({} transactions):", self.total_transactions)?;
        writeln!(f, "  Efficiency:  {}", self.efficiency)?;
        writeln!(f, "  Trade ratio: {}", self.trade_ratio)?;
        writeln!(f, "  Price RMSD:  {}", self.rmsd)?;
        match &self.order_correlation {
            Some(s) => writeln!(f, "  Order correlation: rho {:.3} (p {:.4})", s.rho, s.p_value),
            None => writeln!(f, "  Order correlation: n/a (too few transactions)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq_fixture() -> Equilibrium {
        Equilibrium {
            price: 8.0,
            quantity: 2,
            surplus: 8.0,
            buyer_surplus: 2.0,
            seller_surplus: 6.0,
        }
    }

    fn txn(buyer_valuation: f64, seller_valuation: f64) -> TransactionRecord {
        TransactionRecord {
            period: 0,
            tick: 0,
            price: 7.0,
            buyer_id: 0,
            seller_id: 0,
            buyer_valuation,
            seller_valuation,
            squared_deviation: 1.0,
            running_surplus: buyer_valuation - seller_valuation,
            running_quantity: 1,
        }
    }

    #[test]
    fn efficiency_is_surplus_fraction() {
        let eq = eq_fixture();
        assert_eq!(allocative_efficiency(8.0, &eq), 1.0);
        assert_eq!(allocative_efficiency(4.0, &eq), 0.5);
        assert_eq!(allocative_efficiency(0.0, &eq), 0.0);
    }

    #[test]
    fn trade_ratio_counts_units() {
        let eq = eq_fixture();
        assert_eq!(trade_ratio(2, &eq), 1.0);
        assert_eq!(trade_ratio(1, &eq), 0.5);
    }

    #[test]
    fn rmsd_of_exact_prices_is_zero() {
        let eq = eq_fixture();
        assert_eq!(price_rmsd(&[8.0, 8.0, 8.0], &eq), 0.0);
        assert_eq!(price_rmsd(&[], &eq), 0.0);
        let off = price_rmsd(&[7.0, 9.0], &eq);
        assert!((off - 1.0).abs() < 1e-12);
    }

    #[test]
    fn average_ranks_handle_ties() {
        let ranks = average_ranks(&[10.0, 20.0, 20.0, 5.0], false);
        assert_eq!(ranks, vec![2.0, 3.5, 3.5, 1.0]);
        let desc = average_ranks(&[10.0, 20.0, 20.0, 5.0], true);
        assert_eq!(desc, vec![3.0, 1.5, 1.5, 4.0]);
    }

    #[test]
    fn perfectly_ordered_transactions_correlate() {
        // buyers trade in descending valuation order, sellers ascending
        let transactions = vec![
            txn(100.0, 40.0),
            txn(90.0, 50.0),
            txn(80.0, 60.0),
            txn(70.0, 70.0),
        ];
        let result = transaction_order_correlation(&transactions).unwrap();
        assert!((result.rho - 1.0).abs() < 1e-12);
        assert!(result.p_value < 1e-9);
    }

    #[test]
    fn reversed_order_gives_negative_rho() {
        let transactions = vec![
            txn(70.0, 40.0),
            txn(80.0, 50.0),
            txn(90.0, 60.0),
            txn(100.0, 70.0),
        ];
        let result = transaction_order_correlation(&transactions).unwrap();
        assert!((result.rho + 1.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_transactions_yield_none() {
        assert!(transaction_order_correlation(&[txn(10.0, 5.0)]).is_none());
    }

    #[test]
    fn student_t_matches_known_values() {
        // t = 0 is the null; two-sided p must be 1
        assert!((student_t_two_sided(0.0, 10.0) - 1.0).abs() < 1e-9);
        // large |t| drives p toward zero
        assert!(student_t_two_sided(50.0, 10.0) < 1e-9);
        // t = 2.228, df = 10 is the 5% two-sided critical value
        let p = student_t_two_sided(2.228, 10.0);
        assert!((p - 0.05).abs() < 0.001, "p was {}", p);
    }

    #[test]
    fn summary_stat_mean_and_std() {
        let stat = SummaryStat::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stat.mean - 5.0).abs() < 1e-12);
        // sample std dev with n-1 denominator
        assert!((stat.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        let single = SummaryStat::from_values(&[3.0]);
        assert_eq!(single.std_dev, 0.0);
    }

    #[test]
    fn profit_dispersion_is_squared_gap() {
        assert_eq!(profit_dispersion(5.0, 8.0), 9.0);
        assert_eq!(profit_dispersion(8.0, 8.0), 0.0);
    }
}
