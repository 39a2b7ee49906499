//! One continuous double auction run: agent construction from a scenario,
//! the turn-based tick/period loop, trade settlement, and record emission.

use log::{debug, info};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::fmt;

use crate::agents::{Agent, create_strategy};
use crate::equilibrium::{self, Equilibrium, EquilibriumError};
use crate::market::{Market, Shout, Side};
use crate::metrics::{
    RunMetrics, allocative_efficiency, price_rmsd, trade_ratio, transaction_order_correlation,
};
use crate::records::{AgentPeriodRecord, PeriodRecord, RecordLog, TransactionRecord};
use crate::scenario::{PopulationSpec, Scenario, ScheduleSource};
use crate::valuation::ValuationSchedule;

/// Fatal setup failures. Once the loop is running, anything that goes wrong
/// on a tick (an unwilling agent, an uncrossable book) is absorbed as a
/// quiet tick instead.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupError {
    InvalidScenario(String),
    Equilibrium(EquilibriumError),
    DegenerateSchedule,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::InvalidScenario(msg) => write!(f, "Invalid scenario: {}", msg),
            SetupError::Equilibrium(e) => write!(f, "Equilibrium solver failed: {}", e),
            SetupError::DegenerateSchedule => {
                write!(f, "Valuation schedule admits no gains from trade")
            }
        }
    }
}

impl Error for SetupError {}

impl From<EquilibriumError> for SetupError {
    fn from(e: EquilibriumError) -> Self {
        SetupError::Equilibrium(e)
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub scenario_name: String,
    pub seed: u64,
    pub equilibrium: Equilibrium,
    pub metrics: RunMetrics,
    pub log: RecordLog,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run '{}' (seed {})", self.scenario_name, self.seed)?;
        writeln!(f, "  {}", self.equilibrium)?;
        write!(f, "{}", self.metrics)
    }
}

/// One settled match, before it is folded into the period's records.
struct TradeFill {
    buyer_id: usize,
    seller_id: usize,
    price: f64,
    buyer_valuation: f64,
    seller_valuation: f64,
}

/// A configured auction ready to run.
///
/// Agent ids are global: buyers occupy `0..num_buyers`, sellers follow.
/// All randomness flows through the one seeded generator, so a scenario
/// and a seed fully determine every record the run emits.
#[derive(Debug)]
pub struct CdaAuction {
    scenario: Scenario,
    seed: u64,
    rng: StdRng,
    market: Market,
    agents: Vec<Agent>,
    num_buyers: usize,
    equilibrium: Equilibrium,
    log: RecordLog,
}

impl CdaAuction {
    pub fn new(scenario: Scenario, seed: u64) -> Result<Self, SetupError> {
        scenario.validate().map_err(SetupError::InvalidScenario)?;
        let mut rng = StdRng::seed_from_u64(seed);

        let total_buyers = scenario.population.total_buyers();
        let total_sellers = scenario.population.total_sellers();

        let (schedule, equilibrium) = match &scenario.schedule {
            ScheduleSource::Random => ValuationSchedule::generate(
                &mut rng,
                total_buyers,
                total_sellers,
                scenario.parameters.commodities,
                scenario.parameters.min_limit,
                scenario.parameters.max_limit,
            ),
            ScheduleSource::Explicit { buyers, sellers } => {
                let schedule = ValuationSchedule::new(
                    broadcast(buyers, total_buyers),
                    broadcast(sellers, total_sellers),
                );
                let eq = schedule.solve_equilibrium()?;
                if eq.is_degenerate() {
                    return Err(SetupError::DegenerateSchedule);
                }
                (schedule, eq)
            }
        };

        info!(
            "scenario '{}' seed {}: equilibrium price {:.2}, quantity {}, surplus {:.2}",
            scenario.name, seed, equilibrium.price, equilibrium.quantity, equilibrium.surplus
        );

        let mut agents = Vec::with_capacity(total_buyers + total_sellers);
        build_side(
            &mut agents,
            Side::Buyer,
            &scenario,
            schedule.buyers(),
            &equilibrium,
            &mut rng,
        )?;
        build_side(
            &mut agents,
            Side::Seller,
            &scenario,
            schedule.sellers(),
            &equilibrium,
            &mut rng,
        )?;

        let market = Market::new(scenario.parameters.min_price, scenario.parameters.max_price);
        let log = RecordLog::new(&scenario.name, seed);

        Ok(CdaAuction {
            scenario,
            seed,
            rng,
            market,
            agents,
            num_buyers: total_buyers,
            equilibrium,
            log,
        })
    }

    pub fn equilibrium(&self) -> &Equilibrium {
        &self.equilibrium
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Runs every period and returns the collected records and metrics.
    pub fn run(mut self) -> RunSummary {
        for period in 0..self.scenario.parameters.periods {
            self.run_period(period);
        }
        let metrics = RunMetrics::from_records(&self.log.periods, &self.log.transactions);
        RunSummary {
            scenario_name: self.scenario.name.clone(),
            seed: self.seed,
            equilibrium: self.equilibrium,
            metrics,
            log: self.log,
        }
    }

    fn run_period(&mut self, period: usize) {
        let total_time = self.scenario.parameters.total_time;
        let activation = self.scenario.parameters.activation;

        let mut period_transactions: Vec<TransactionRecord> = Vec::new();
        let mut realized_surplus = 0.0;
        let mut ticks_elapsed = 0;
        let mut timed_out = true;

        for time in 0..total_time {
            if is_end_auction(&self.agents, self.num_buyers) {
                timed_out = false;
                break;
            }
            ticks_elapsed = time + 1;
            self.market.begin_tick();

            let view = self.market.view(time, total_time);
            for agent in &mut self.agents {
                agent.set_activity(&view);
            }

            // participation gate, then uniform choice among the willing
            let mut eligible = Vec::new();
            for (idx, agent) in self.agents.iter().enumerate() {
                if agent.in_market && agent.active && self.rng.random_bool(activation) {
                    eligible.push(idx);
                }
            }

            let mut fill: Option<TradeFill> = None;
            if !eligible.is_empty() {
                let idx = eligible[self.rng.random_range(0..eligible.len())];
                fill = self.shout_and_maybe_trade(idx, &view);
            }
            let traded_this_tick = fill.is_some();

            match fill {
                Some(fill) => {
                    realized_surplus += fill.buyer_valuation - fill.seller_valuation;
                    period_transactions.push(TransactionRecord {
                        period,
                        tick: time,
                        price: fill.price,
                        buyer_id: fill.buyer_id,
                        seller_id: fill.seller_id,
                        buyer_valuation: fill.buyer_valuation,
                        seller_valuation: fill.seller_valuation,
                        squared_deviation: (fill.price - self.equilibrium.price).powi(2),
                        running_surplus: realized_surplus,
                        running_quantity: period_transactions.len() + 1,
                    });
                }
                None => {
                    self.market.no_transactions += 1;
                    for agent in &mut self.agents {
                        agent.update_no_transactions();
                    }
                }
            }

            let post_view = self.market.view(time, total_time);
            let last_tick = time + 1 == total_time;
            for agent in &mut self.agents {
                agent.adapt(&post_view, last_tick, traded_this_tick, &mut self.rng);
            }

            debug_assert!(self.market.book_is_consistent());
        }

        debug!(
            "period {}: {} trades in {} ticks (timed out: {})",
            period,
            period_transactions.len(),
            ticks_elapsed,
            timed_out
        );

        self.close_period(period, ticks_elapsed, period_transactions, realized_surplus, timed_out);
    }

    /// The chosen agent shouts. A crossing shout executes immediately at the
    /// standing quote; otherwise the shout competes for the book.
    fn shout_and_maybe_trade(
        &mut self,
        idx: usize,
        view: &crate::market::MarketView,
    ) -> Option<TradeFill> {
        let side = self.agents[idx].side;
        let price = self.agents[idx].offer_price(view, &mut self.rng)?;
        let shout = Shout { agent_id: idx, side, price };
        self.market.record_shout(shout);

        if !self.market.is_trade_possible(side, price) {
            self.market.update_best_price(shout);
            return None;
        }

        // trade executes at the standing quote, not the incoming shout
        let (buyer_id, seller_id, trade_price) = match side {
            Side::Buyer => (idx, self.market.best_ask_id?, self.market.best_ask),
            Side::Seller => (self.market.best_bid_id?, idx, self.market.best_bid),
        };

        let (buyer, seller) = pair_mut(&mut self.agents, buyer_id, seller_id);
        let buyer_valuation = buyer.get_price();
        let seller_valuation = seller.get_price();
        self.market.log_matched_valuations(buyer_valuation, seller_valuation);

        buyer.transaction_update(trade_price);
        seller.transaction_update(trade_price);
        buyer.set_in_market();
        seller.set_in_market();
        self.market.settle_trade(buyer_id, seller_id, trade_price);

        self.market.no_transactions = 0;
        for agent in &mut self.agents {
            agent.reset_offer();
            if agent.id == buyer_id || agent.id == seller_id {
                agent.reset_no_transactions();
            } else {
                agent.update_no_transactions();
            }
        }

        Some(TradeFill { buyer_id, seller_id, price: trade_price, buyer_valuation, seller_valuation })
    }

    fn close_period(
        &mut self,
        period: usize,
        ticks_elapsed: usize,
        transactions: Vec<TransactionRecord>,
        realized_surplus: f64,
        timed_out: bool,
    ) {
        for agent in &mut self.agents {
            agent.set_profit_dispersion();
            self.log.agents.push(AgentPeriodRecord {
                period,
                agent_id: agent.id,
                side: agent.side,
                strategy: agent.strategy_name().to_string(),
                units_traded: agent.quantity,
                surplus: agent.surplus,
                equilibrium_surplus: agent.eq_surplus,
                profit_dispersion: agent.profit_dispersion,
            });
        }

        let prices: Vec<f64> = transactions.iter().map(|t| t.price).collect();
        let mean_price = if prices.is_empty() {
            0.0
        } else {
            prices.iter().sum::<f64>() / prices.len() as f64
        };
        self.log.periods.push(PeriodRecord {
            period,
            ticks_elapsed,
            transactions: transactions.len(),
            traded_quantity: transactions.len(),
            realized_surplus,
            efficiency: allocative_efficiency(realized_surplus, &self.equilibrium),
            trade_ratio: trade_ratio(transactions.len(), &self.equilibrium),
            rmsd: price_rmsd(&prices, &self.equilibrium),
            mean_price,
            rank_correlation: transaction_order_correlation(&transactions),
            timed_out,
        });
        self.log.transactions.extend(transactions);

        self.market.reset_period();
        for agent in &mut self.agents {
            agent.reset_for_period();
        }
    }
}

/// No gains from trade remain: no in-market buyer both values a unit at or
/// above the cheapest remaining ask-side limit price and can afford it.
fn is_end_auction(agents: &[Agent], num_buyers: usize) -> bool {
    let min_sell = agents[num_buyers..]
        .iter()
        .filter(|a| a.in_market)
        .map(|a| a.get_price())
        .fold(f64::INFINITY, f64::min);
    !agents[..num_buyers]
        .iter()
        .any(|b| b.in_market && b.get_price() >= min_sell && b.get_budget() >= min_sell)
}

/// A single explicit ladder stands for every trader on its side.
fn broadcast(ladders: &[Vec<f64>], total: usize) -> Vec<Vec<f64>> {
    if ladders.len() == 1 {
        vec![ladders[0].clone(); total]
    } else {
        ladders.to_vec()
    }
}

fn build_side(
    agents: &mut Vec<Agent>,
    side: Side,
    scenario: &Scenario,
    ladders: &[Vec<f64>],
    equilibrium: &Equilibrium,
    rng: &mut StdRng,
) -> Result<(), SetupError> {
    let spec = match side {
        Side::Buyer => &scenario.population.buyers,
        Side::Seller => &scenario.population.sellers,
    };
    let kinds = PopulationSpec::resolve_side(spec).map_err(SetupError::InvalidScenario)?;

    let mut ladder_iter = ladders.iter();
    for (kind, count) in kinds {
        for _ in 0..count {
            let ladder = ladder_iter
                .next()
                .ok_or_else(|| {
                    SetupError::InvalidScenario(format!(
                        "Schedule has too few {} ladders",
                        side.label()
                    ))
                })?
                .clone();
            let eq_surplus = match side {
                Side::Buyer => equilibrium::buyer_surplus_at(&ladder, equilibrium.price),
                Side::Seller => equilibrium::seller_surplus_at(&ladder, equilibrium.price),
            };
            let id = agents.len();
            let strategy = create_strategy(kind, side, ladder.len(), &scenario.kaplan, &scenario.zip, rng);
            agents.push(Agent::new(id, side, ladder, eq_surplus, strategy));
        }
    }
    Ok(())
}

fn pair_mut(agents: &mut [Agent], buyer_id: usize, seller_id: usize) -> (&mut Agent, &mut Agent) {
    debug_assert!(buyer_id != seller_id);
    if buyer_id < seller_id {
        let (lo, hi) = agents.split_at_mut(seller_id);
        (&mut lo[buyer_id], &mut hi[0])
    } else {
        let (lo, hi) = agents.split_at_mut(buyer_id);
        (&mut hi[0], &mut lo[seller_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::create_standard_scenarios;

    fn two_by_two() -> Scenario {
        create_standard_scenarios().remove("two_by_two").unwrap()
    }

    #[test]
    fn setup_solves_the_explicit_equilibrium() {
        let auction = CdaAuction::new(two_by_two(), 7).unwrap();
        let eq = auction.equilibrium();
        assert_eq!(eq.price, 8.0);
        assert_eq!(eq.quantity, 2);
        assert_eq!(eq.surplus, 8.0);
        assert_eq!(auction.agents().len(), 4);
        assert_eq!(auction.agents()[0].side, Side::Buyer);
        assert_eq!(auction.agents()[3].side, Side::Seller);
    }

    #[test]
    fn per_agent_equilibrium_surplus_sums_to_total() {
        let auction = CdaAuction::new(two_by_two(), 7).unwrap();
        let total: f64 = auction.agents().iter().map(|a| a.eq_surplus).sum();
        assert!((total - 8.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_scenario_is_fatal() {
        let mut scenario = two_by_two();
        scenario.parameters.periods = 0;
        assert!(matches!(
            CdaAuction::new(scenario, 1),
            Err(SetupError::InvalidScenario(_))
        ));
    }

    #[test]
    fn degenerate_explicit_schedule_is_fatal() {
        let mut scenario = two_by_two();
        // every seller cost above every buyer valuation
        scenario.schedule = ScheduleSource::Explicit {
            buyers: vec![vec![4.0], vec![3.0]],
            sellers: vec![vec![10.0], vec![12.0]],
        };
        let err = CdaAuction::new(scenario, 1).unwrap_err();
        assert!(matches!(err, SetupError::Equilibrium(_) | SetupError::DegenerateSchedule));
    }

    #[test]
    fn two_by_two_realizes_the_full_surplus() {
        let summary = CdaAuction::new(two_by_two(), 42).unwrap().run();
        let period = &summary.log.periods[0];

        // either pairing of the two profitable matches yields surplus 8,
        // so both trades clearing means efficiency is exactly 1
        assert_eq!(period.transactions, 2);
        assert!((period.realized_surplus - summary.equilibrium.surplus).abs() < 1e-9);
        assert!((period.efficiency - 1.0).abs() < 1e-9);
        assert_eq!(summary.log.periods.len(), 1);
        for t in &summary.log.transactions {
            assert!(t.price >= 0.0 && t.price <= 20.0);
            assert!(t.buyer_id < 2, "buyer ids come first");
            assert!(t.seller_id >= 2);
        }
    }

    #[test]
    fn agents_never_trade_past_their_endowment() {
        let summary = CdaAuction::new(two_by_two(), 99).unwrap().run();
        for record in &summary.log.agents {
            assert!(record.units_traded <= 1);
        }
    }

    #[test]
    fn same_seed_reproduces_every_record() {
        let scenario = create_standard_scenarios().remove("mixed_market").unwrap();
        let a = CdaAuction::new(scenario.clone(), 1234).unwrap().run();
        let b = CdaAuction::new(scenario, 1234).unwrap().run();

        assert_eq!(a.log.transactions.len(), b.log.transactions.len());
        for (x, y) in a.log.transactions.iter().zip(&b.log.transactions) {
            assert_eq!(x.period, y.period);
            assert_eq!(x.tick, y.tick);
            assert_eq!(x.price, y.price);
            assert_eq!(x.buyer_id, y.buyer_id);
            assert_eq!(x.seller_id, y.seller_id);
        }
        assert_eq!(a.equilibrium.price, b.equilibrium.price);
    }

    #[test]
    fn different_seeds_usually_diverge() {
        let scenario = create_standard_scenarios().remove("zic_baseline").unwrap();
        let a = CdaAuction::new(scenario.clone(), 1).unwrap().run();
        let b = CdaAuction::new(scenario, 2).unwrap().run();
        // schedules are drawn from the rng, so the equilibria differ too
        let same_everything = a.equilibrium.price == b.equilibrium.price
            && a.log.transactions.len() == b.log.transactions.len();
        assert!(!same_everything || a.log.transactions.is_empty());
    }

    #[test]
    fn end_condition_detects_exhausted_gains() {
        let auction = CdaAuction::new(two_by_two(), 5).unwrap();
        let mut agents = auction.agents.clone();
        assert!(!is_end_auction(&agents, 2));

        // trade out both buyers
        for agent in agents.iter_mut().take(2) {
            agent.transaction_update(7.0);
            agent.set_in_market();
        }
        assert!(is_end_auction(&agents, 2));
    }

    #[test]
    fn generated_schedule_scenario_runs_all_periods() {
        let scenario = create_standard_scenarios().remove("zip_convergence").unwrap();
        let periods = scenario.parameters.periods;
        let summary = CdaAuction::new(scenario, 7).unwrap().run();
        assert_eq!(summary.log.periods.len(), periods);
        for period in &summary.log.periods {
            assert!(period.ticks_elapsed <= 300);
        }
    }
}
