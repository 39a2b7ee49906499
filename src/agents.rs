//! Trading agents for the continuous double auction.
//!
//! Four strategy variants share one agent record: ZI (unconstrained random),
//! ZI-C (budget/valuation constrained random), Kaplan (wait-and-snipe) and
//! ZIP (adaptive profit margins). Dispatch is a closed enum rather than a
//! trait object: the strategy set is fixed and most variants carry state
//! that the scheduler has to reset at period boundaries.
//!
//! Agents only ever read the market through a [`MarketView`]; every
//! mutation of shared state happens in the scheduler.

use rand::Rng;
use rand::rngs::StdRng;

use crate::market::{MarketView, Side};
use crate::scenario::{KaplanParams, ZipParams};

/// Strategy identifier, also used in population specs and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Zi,
    ZiC,
    Kaplan,
    Zip,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Zi => "ZI",
            StrategyKind::ZiC => "ZI_C",
            StrategyKind::Kaplan => "KAPLAN",
            StrategyKind::Zip => "ZIP",
        }
    }

    pub fn from_name(name: &str) -> Option<StrategyKind> {
        match name.to_uppercase().replace('-', "_").as_str() {
            "ZI" => Some(StrategyKind::Zi),
            "ZI_C" | "ZIC" => Some(StrategyKind::ZiC),
            "KAPLAN" => Some(StrategyKind::Kaplan),
            "ZIP" => Some(StrategyKind::Zip),
            _ => None,
        }
    }

    pub fn all() -> [StrategyKind; 4] {
        [StrategyKind::Zi, StrategyKind::ZiC, StrategyKind::Kaplan, StrategyKind::Zip]
    }
}

/// Direction of a ZIP margin adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarginMove {
    Raise,
    Lower,
}

// === KAPLAN STATE ===

/// Kaplan parameters are drawn once per agent: each configured base value
/// is perturbed by uniform noise of up to half its magnitude, so a
/// population of Kaplan traders is heterogeneous.
#[derive(Debug, Clone, PartialEq)]
pub struct KaplanState {
    pub spread_ratio: f64,
    pub profit_perc: f64,
    pub time_frac: f64,
    /// Most aggressive acceptable quote, recomputed each tick.
    pub most: Option<f64>,
}

impl KaplanState {
    fn draw(params: &KaplanParams, rng: &mut StdRng) -> Self {
        KaplanState {
            spread_ratio: add_random_noise(params.spread_ratio, rng),
            profit_perc: add_random_noise(params.profit_perc, rng),
            time_frac: add_random_noise(params.time_frac, rng),
            most: None,
        }
    }
}

fn add_random_noise(param: f64, rng: &mut StdRng) -> f64 {
    let half = param.abs() / 2.0;
    if half > 0.0 { param + rng.random_range(-half..=half) } else { param }
}

// === ZIP STATE ===

/// ZIP learning state: one profit margin and one momentum cell per unit,
/// plus the drawn Widrow-Hoff coefficients and the target-price ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipState {
    pub profit_margins: Vec<f64>,
    pub momentum: Vec<f64>,
    pub learning_rate: f64,
    pub momentum_coeff: f64,
    increasing_rel_target: (f64, f64),
    decreasing_rel_target: (f64, f64),
    increasing_abs_target: (f64, f64),
    decreasing_abs_target: (f64, f64),
}

impl ZipState {
    fn draw(params: &ZipParams, side: Side, units: usize, rng: &mut StdRng) -> Self {
        let margin_range = match side {
            Side::Buyer => params.profit_margin_buyers,
            Side::Seller => params.profit_margin_sellers,
        };
        ZipState {
            profit_margins: (0..units).map(|_| uniform_in(margin_range, rng)).collect(),
            momentum: vec![0.0; units],
            learning_rate: uniform_in(params.learning_rate, rng),
            momentum_coeff: uniform_in(params.momentum_coeff, rng),
            increasing_rel_target: params.increasing_rel_target,
            decreasing_rel_target: params.decreasing_rel_target,
            increasing_abs_target: params.increasing_abs_target,
            decreasing_abs_target: params.decreasing_abs_target,
        }
    }

    /// Raw margin quote for one unit, before any budget clamp.
    fn quote(&self, valuation: f64, q: usize) -> f64 {
        valuation * (1.0 + self.profit_margins[q])
    }

    /// Randomized target price for an adjustment. Buyers chase lower
    /// prices when raising their margin, sellers higher ones; the
    /// asymmetric range pairs encode that.
    fn target_price(&self, side: Side, mv: MarginMove, last_shout: f64, rng: &mut StdRng) -> f64 {
        let (rel, abs) = match (side, mv) {
            (Side::Buyer, MarginMove::Raise) => (self.decreasing_rel_target, self.decreasing_abs_target),
            (Side::Buyer, MarginMove::Lower) => (self.increasing_rel_target, self.increasing_abs_target),
            (Side::Seller, MarginMove::Raise) => (self.increasing_rel_target, self.increasing_abs_target),
            (Side::Seller, MarginMove::Lower) => (self.decreasing_rel_target, self.decreasing_abs_target),
        };
        uniform_in(rel, rng) * last_shout + uniform_in(abs, rng)
    }

    /// Momentum-smoothed Widrow-Hoff step. At `time == 0` the prior
    /// momentum is returned untouched: there is no meaningful previous
    /// quote to learn from on the first tick of a period.
    fn update_momentum(&mut self, q: usize, target: f64, offer: f64, time: usize) -> f64 {
        if time == 0 {
            return self.momentum[q];
        }
        let delta = self.learning_rate * (target - offer);
        self.momentum[q] = self.momentum_coeff * self.momentum[q] + (1.0 - self.momentum_coeff) * delta;
        self.momentum[q]
    }

    fn adjust(
        &mut self,
        side: Side,
        mv: MarginMove,
        q: usize,
        valuation: f64,
        offer: f64,
        last_shout: f64,
        time: usize,
        rng: &mut StdRng,
    ) {
        let target = self.target_price(side, mv, last_shout, rng);
        let momentum = self.update_momentum(q, target, offer, time);
        self.profit_margins[q] = (offer + momentum) / valuation - 1.0;
        self.clamp_margin(side, q);
    }

    fn clamp_margin(&mut self, side: Side, q: usize) {
        match side {
            Side::Buyer => {
                self.profit_margins[q] = self.profit_margins[q].clamp(-1.0, 0.0);
            }
            Side::Seller => {
                if self.profit_margins[q] < 0.0 {
                    self.profit_margins[q] = 0.0;
                }
            }
        }
    }
}

fn uniform_in(range: (f64, f64), rng: &mut StdRng) -> f64 {
    let (lo, hi) = range;
    if lo < hi { rng.random_range(lo..=hi) } else { lo }
}

/// Closed set of strategy variants; stateless ones are unit-like.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyState {
    Zi,
    ZiC,
    Kaplan(KaplanState),
    Zip(ZipState),
}

impl StrategyState {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyState::Zi => StrategyKind::Zi,
            StrategyState::ZiC => StrategyKind::ZiC,
            StrategyState::Kaplan(_) => StrategyKind::Kaplan,
            StrategyState::Zip(_) => StrategyKind::Zip,
        }
    }
}

/// Instantiates the strategy state for a fresh agent, drawing any
/// randomized parameters from the run's generator.
pub fn create_strategy(
    kind: StrategyKind,
    side: Side,
    units: usize,
    kaplan: &KaplanParams,
    zip: &ZipParams,
    rng: &mut StdRng,
) -> StrategyState {
    match kind {
        StrategyKind::Zi => StrategyState::Zi,
        StrategyKind::ZiC => StrategyState::ZiC,
        StrategyKind::Kaplan => StrategyState::Kaplan(KaplanState::draw(kaplan, rng)),
        StrategyKind::Zip => StrategyState::Zip(ZipState::draw(zip, side, units, rng)),
    }
}

// === AGENT ===

/// One trader in the auction. Buyers start each period with a budget equal
/// to the sum of their unit valuations; sellers accumulate receipts.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: usize,
    pub side: Side,
    prices: Vec<f64>,
    pub quantity: usize,
    pub prev_quantity: usize,
    pub budget: f64,
    pub eq_surplus: f64,
    pub surplus: f64,
    pub prev_surplus: f64,
    pub profit_dispersion: f64,
    /// Last shouted price; side sentinel (0 buyer / +inf seller) when none.
    pub offer: f64,
    pub in_market: bool,
    pub active: bool,
    pub no_transactions: u32,
    pub strategy: StrategyState,
}

fn offer_sentinel(side: Side) -> f64 {
    match side {
        Side::Buyer => 0.0,
        Side::Seller => f64::INFINITY,
    }
}

impl Agent {
    pub fn new(id: usize, side: Side, prices: Vec<f64>, eq_surplus: f64, strategy: StrategyState) -> Self {
        assert!(!prices.is_empty(), "agent needs at least one unit valuation");
        let budget = match side {
            Side::Buyer => prices.iter().sum(),
            Side::Seller => 0.0,
        };
        Agent {
            id,
            side,
            offer: offer_sentinel(side),
            quantity: 0,
            prev_quantity: 0,
            budget,
            eq_surplus,
            surplus: 0.0,
            prev_surplus: 0.0,
            profit_dispersion: 0.0,
            in_market: true,
            active: true,
            no_transactions: 0,
            prices,
            strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.kind().name()
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Current unit's limit price. Wraps at the ladder end so callers that
    /// fire after the final trade stay in range.
    pub fn valuation(&self) -> f64 {
        self.prices[self.quantity % self.prices.len()]
    }

    pub fn still_commodities(&self) -> bool {
        self.quantity < self.prices.len()
    }

    /// Leaving the market is terminal until the period resets.
    pub fn set_in_market(&mut self) {
        self.in_market = self.still_commodities();
    }

    /// Limit price of the current unit, or the side sentinel once the
    /// agent has traded out.
    pub fn get_price(&self) -> f64 {
        if self.still_commodities() {
            self.prices[self.quantity]
        } else {
            match self.side {
                Side::Buyer => 0.0,
                Side::Seller => f64::INFINITY,
            }
        }
    }

    pub fn get_budget(&self) -> f64 {
        self.budget
    }

    /// Recomputes the willingness predicate for this tick.
    pub fn set_activity(&mut self, view: &MarketView) {
        if !self.still_commodities() {
            self.active = false;
            return;
        }
        self.active = match self.strategy.kind() {
            StrategyKind::Zi => true,
            StrategyKind::ZiC => self.zic_willing(view),
            StrategyKind::Zip => self.zip_willing(view),
            StrategyKind::Kaplan => self.kaplan_activity(view),
        };
    }

    fn zic_willing(&self, view: &MarketView) -> bool {
        let valuation = self.prices[self.quantity];
        match self.side {
            Side::Buyer => valuation > view.best_bid && view.best_bid < self.budget,
            Side::Seller => valuation < view.best_ask,
        }
    }

    fn zip_willing(&self, view: &MarketView) -> bool {
        let StrategyState::Zip(zip) = &self.strategy else { return false };
        let valuation = self.prices[self.quantity];
        let quote = zip.quote(valuation, self.quantity % self.prices.len());
        match self.side {
            Side::Buyer => {
                valuation > view.best_bid && quote > view.best_bid && view.best_bid < self.budget
            }
            Side::Seller => valuation < view.best_ask && quote < view.best_ask,
        }
    }

    /// The sharpest quote a Kaplan trader would ever accept, bounded by the
    /// next unit's valuation so sniping one unit never spoils the next.
    fn kaplan_most(&self, view: &MarketView) -> f64 {
        let next_token = if self.quantity != self.prices.len() - 1 {
            self.prices[self.quantity + 1]
        } else {
            self.prices[self.quantity]
        };
        match self.side {
            Side::Buyer => {
                if view.best_ask.is_finite() {
                    view.best_ask.min(next_token - 1.0)
                } else {
                    next_token - 1.0
                }
            }
            Side::Seller => {
                if view.best_bid != 0.0 {
                    view.best_bid.max(next_token + 1.0)
                } else {
                    next_token + 1.0
                }
            }
        }
    }

    fn kaplan_activity(&mut self, view: &MarketView) -> bool {
        let most = self.kaplan_most(view);
        let (spread_ratio, profit_perc, time_frac) = {
            let StrategyState::Kaplan(k) = &mut self.strategy else { return false };
            k.most = Some(most);
            (k.spread_ratio, k.profit_perc, k.time_frac)
        };

        // with no opposing quote yet there is nothing to snipe; shout the
        // sentinel to open the market
        let can_shout = match self.side {
            Side::Buyer => {
                if view.best_bid == 0.0 {
                    return true;
                }
                most > view.best_bid && most <= self.budget
            }
            Side::Seller => {
                if view.best_ask.is_infinite() {
                    return true;
                }
                most < view.best_ask
            }
        };

        let valuation = self.prices[self.quantity];
        let juicy_offer = match self.side {
            Side::Buyer => view.best_ask < view.prev_min_trade,
            Side::Seller => view.best_bid > view.prev_max_trade,
        };
        let small_spread = match self.side {
            Side::Buyer => {
                view.best_ask < view.prev_max_trade
                    && view.best_ask - view.best_bid < spread_ratio * view.best_ask
                    && valuation - view.best_ask > (1.0 - profit_perc) * valuation
            }
            Side::Seller => {
                view.best_bid > view.prev_min_trade
                    && view.best_ask - view.best_bid < spread_ratio * view.best_bid
                    && view.best_bid - valuation > (1.0 + profit_perc) * valuation
            }
        };
        let time_out = 1.0 - (view.time as f64 / view.total_time as f64) < time_frac;
        let remaining = (view.total_time - view.time) as f64;
        let truthteller = view.no_transactions as f64 > 0.5 * remaining
            || (view.no_transactions > 5 && self.no_transactions as f64 > 2.0 / 3.0 * remaining);

        can_shout && (juicy_offer || small_spread || time_out || truthteller)
    }

    /// Forms this tick's quote, or `None` when the feasible interval is
    /// inverted: the agent simply does not shout rather than quote at a
    /// loss.
    pub fn offer_price(&mut self, view: &MarketView, rng: &mut StdRng) -> Option<f64> {
        let offer = match self.strategy.kind() {
            StrategyKind::Zi => match self.side {
                Side::Buyer => sample_uniform(view.best_bid + 0.01, view.max_poss_price, rng),
                Side::Seller => {
                    let hi = if view.best_ask.is_finite() {
                        view.best_ask - 0.01
                    } else {
                        view.max_poss_price
                    };
                    sample_uniform(view.min_poss_price, hi, rng)
                }
            },
            StrategyKind::ZiC => {
                let valuation = self.prices[self.quantity];
                match self.side {
                    Side::Buyer => {
                        let max_bid = if self.budget > valuation { valuation } else { self.budget };
                        sample_uniform(view.best_bid + 0.01, max_bid, rng)
                    }
                    Side::Seller => {
                        let hi = if view.best_ask.is_finite() {
                            view.best_ask - 0.01
                        } else {
                            view.max_poss_price
                        };
                        sample_uniform(valuation, hi, rng)
                    }
                }
            }
            StrategyKind::Kaplan => {
                let most = self.kaplan_most(view);
                match self.side {
                    Side::Buyer => {
                        if view.best_bid != 0.0 {
                            Some(view.best_ask.min(most))
                        } else {
                            Some(view.min_poss_price)
                        }
                    }
                    Side::Seller => {
                        if view.best_ask.is_finite() {
                            Some(view.best_bid.max(most))
                        } else {
                            Some(view.max_poss_price)
                        }
                    }
                }
            }
            StrategyKind::Zip => {
                let StrategyState::Zip(zip) = &self.strategy else { return None };
                let q = self.quantity % self.prices.len();
                let mut quote = zip.quote(self.prices[self.quantity], q);
                if self.side == Side::Buyer && quote > self.budget {
                    quote = self.budget;
                }
                Some(quote)
            }
        };

        if let Some(price) = offer {
            self.offer = price;
        }
        offer
    }

    /// Settles one unit at `price` and returns the surplus gained.
    pub fn transaction_update(&mut self, price: f64) -> f64 {
        let valuation = self.prices[self.quantity];
        let surplus = match self.side {
            Side::Buyer => {
                self.budget -= price;
                valuation - price
            }
            Side::Seller => {
                self.budget += price;
                price - valuation
            }
        };
        self.surplus += surplus;
        self.quantity += 1;
        surplus
    }

    /// ZIP margin adaptation, invoked for every agent after every tick
    /// regardless of who acted. Other strategies ignore it.
    ///
    /// `trade_made` reports whether this tick cleared a trade. On a quiet
    /// final tick every unit's margin relaxes toward the last shout, even
    /// when earlier ticks of the period did trade. On a tick with a cross,
    /// the margin for the current unit moves depending on whether this
    /// agent's own quote would have beaten the realized price.
    pub fn adapt(&mut self, view: &MarketView, last_tick: bool, trade_made: bool, rng: &mut StdRng) {
        let side = self.side;
        let in_market = self.in_market;
        let quantity = self.quantity;
        let budget = self.budget;
        let StrategyState::Zip(zip) = &mut self.strategy else { return };
        let Some(last) = view.last_shout else { return };

        if last_tick && !trade_made {
            for q in 0..self.prices.len() {
                let offer = zip.quote(self.prices[q], q);
                zip.adjust(side, MarginMove::Lower, q, self.prices[q], offer, last.price, view.time, rng);
            }
        } else if view.transaction_possible {
            let Some(transaction_price) = view.transaction_price else { return };
            let q = quantity % self.prices.len();
            let valuation = self.prices[q];
            let mut offer = zip.quote(valuation, q);
            if side == Side::Buyer && offer > budget {
                offer = budget;
            }

            let beat_the_price = match side {
                Side::Buyer => offer >= transaction_price,
                Side::Seller => offer <= transaction_price,
            };
            let opposite_moved = match side {
                Side::Buyer => last.side == Side::Seller && offer <= transaction_price,
                Side::Seller => last.side == Side::Buyer && offer >= transaction_price,
            };

            if beat_the_price {
                zip.adjust(side, MarginMove::Raise, q, valuation, offer, transaction_price, view.time, rng);
            } else if opposite_moved && in_market {
                zip.adjust(side, MarginMove::Lower, q, valuation, offer, transaction_price, view.time, rng);
            }
        }
    }

    pub fn reset_no_transactions(&mut self) {
        self.no_transactions = 0;
    }

    pub fn update_no_transactions(&mut self) {
        self.no_transactions += 1;
    }

    pub fn set_profit_dispersion(&mut self) {
        let diff = self.surplus - self.eq_surplus;
        self.profit_dispersion = diff * diff;
    }

    pub fn reset_offer(&mut self) {
        self.offer = offer_sentinel(self.side);
        if let StrategyState::Kaplan(k) = &mut self.strategy {
            k.most = None;
        }
    }

    /// Period reset: endowment, budget and counters return to their
    /// initial values while learning state persists. ZIP margins and
    /// Kaplan's drawn parameters carry over; ZIP momentum starts cold.
    pub fn reset_for_period(&mut self) {
        self.prev_quantity = self.quantity;
        self.quantity = 0;
        self.budget = match self.side {
            Side::Buyer => self.prices.iter().sum(),
            Side::Seller => 0.0,
        };
        self.prev_surplus = self.surplus;
        self.surplus = 0.0;
        self.in_market = true;
        self.active = true;
        self.no_transactions = 0;
        self.reset_offer();
        if let StrategyState::Zip(zip) = &mut self.strategy {
            zip.momentum = vec![0.0; zip.momentum.len()];
        }
    }
}

fn sample_uniform(lo: f64, hi: f64, rng: &mut StdRng) -> Option<f64> {
    if lo > hi {
        return None;
    }
    if lo == hi {
        return Some(lo);
    }
    Some(rng.random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{KaplanParams, ZipParams};
    use rand::SeedableRng;

    fn test_view(best_bid: f64, best_ask: f64) -> MarketView {
        MarketView {
            best_bid,
            best_ask,
            min_poss_price: 0.0,
            max_poss_price: 20.0,
            prev_min_trade: f64::NEG_INFINITY,
            prev_max_trade: f64::INFINITY,
            transaction_price: None,
            transaction_possible: false,
            last_shout: None,
            no_transactions: 0,
            time: 10,
            total_time: 50,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    fn zip_agent(side: Side, prices: Vec<f64>) -> Agent {
        let mut rng = rng();
        let state = create_strategy(
            StrategyKind::Zip,
            side,
            prices.len(),
            &KaplanParams::default(),
            &ZipParams::default(),
            &mut rng,
        );
        Agent::new(7, side, prices, 0.0, state)
    }

    fn kaplan_agent(side: Side, prices: Vec<f64>) -> Agent {
        let mut rng = rng();
        let state = create_strategy(
            StrategyKind::Kaplan,
            side,
            prices.len(),
            &KaplanParams::default(),
            &ZipParams::default(),
            &mut rng,
        );
        Agent::new(3, side, prices, 0.0, state)
    }

    #[test]
    fn strategy_names_round_trip() {
        for kind in StrategyKind::all() {
            assert_eq!(StrategyKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(StrategyKind::from_name("zi-c"), Some(StrategyKind::ZiC));
        assert_eq!(StrategyKind::from_name("bogus"), None);
    }

    #[test]
    fn zic_buyer_never_bids_above_valuation_or_budget() {
        let mut agent = Agent::new(1, Side::Buyer, vec![8.0], 0.0, StrategyState::ZiC);
        let view = test_view(2.0, f64::INFINITY);
        let mut rng = rng();
        for _ in 0..200 {
            let offer = agent.offer_price(&view, &mut rng).unwrap();
            assert!(offer > view.best_bid);
            assert!(offer <= 8.0);
            assert!(offer <= agent.get_budget());
        }
    }

    #[test]
    fn zic_seller_never_asks_below_cost() {
        let mut agent = Agent::new(2, Side::Seller, vec![6.0], 0.0, StrategyState::ZiC);
        let view = test_view(0.0, 15.0);
        let mut rng = rng();
        for _ in 0..200 {
            let offer = agent.offer_price(&view, &mut rng).unwrap();
            assert!(offer >= 6.0);
            assert!(offer < 15.0);
        }
    }

    #[test]
    fn inverted_interval_means_no_shout() {
        // standing bid already above the buyer's valuation
        let mut agent = Agent::new(1, Side::Buyer, vec![5.0], 0.0, StrategyState::ZiC);
        let view = test_view(7.0, f64::INFINITY);
        agent.set_activity(&view);
        assert!(!agent.active);
        assert_eq!(agent.offer_price(&view, &mut rng()), None);
    }

    #[test]
    fn exhausted_agent_leaves_the_market() {
        let mut agent = Agent::new(1, Side::Buyer, vec![10.0], 0.0, StrategyState::Zi);
        agent.transaction_update(9.0);
        agent.set_in_market();
        agent.set_activity(&test_view(0.0, f64::INFINITY));
        assert!(!agent.in_market);
        assert!(!agent.active);
        assert_eq!(agent.get_price(), 0.0);
    }

    #[test]
    fn transaction_update_moves_surplus_budget_and_quantity() {
        let mut buyer = Agent::new(1, Side::Buyer, vec![10.0, 8.0], 0.0, StrategyState::ZiC);
        let gained = buyer.transaction_update(7.0);
        assert_eq!(gained, 3.0);
        assert_eq!(buyer.surplus, 3.0);
        assert_eq!(buyer.budget, 11.0);
        assert_eq!(buyer.quantity, 1);

        let mut seller = Agent::new(2, Side::Seller, vec![4.0], 0.0, StrategyState::ZiC);
        let gained = seller.transaction_update(7.0);
        assert_eq!(gained, 3.0);
        assert_eq!(seller.budget, 7.0);
    }

    #[test]
    fn kaplan_with_empty_opposite_book_quotes_the_sentinel() {
        let mut buyer = kaplan_agent(Side::Buyer, vec![10.0, 8.0]);
        let view = test_view(0.0, f64::INFINITY);
        buyer.set_activity(&view);
        assert!(buyer.active);
        assert_eq!(buyer.offer_price(&view, &mut rng()), Some(0.0));

        let mut seller = kaplan_agent(Side::Seller, vec![4.0, 6.0]);
        seller.set_activity(&view);
        assert!(seller.active);
        assert_eq!(seller.offer_price(&view, &mut rng()), Some(20.0));
    }

    #[test]
    fn kaplan_snipes_at_the_standing_ask() {
        let mut buyer = kaplan_agent(Side::Buyer, vec![10.0, 8.0]);
        // most = min(best_ask, next_token - 1) = min(6, 7) = 6
        let view = test_view(3.0, 6.0);
        let offer = buyer.offer_price(&view, &mut rng()).unwrap();
        assert_eq!(offer, 6.0);
    }

    #[test]
    fn kaplan_never_overbids_the_next_unit() {
        let mut buyer = kaplan_agent(Side::Buyer, vec![10.0, 5.0]);
        // next_token - 1 = 4 caps the snipe below the ask of 8
        let view = test_view(3.0, 8.0);
        let offer = buyer.offer_price(&view, &mut rng()).unwrap();
        assert_eq!(offer, 4.0);
    }

    #[test]
    fn kaplan_time_out_forces_activity() {
        let mut buyer = kaplan_agent(Side::Buyer, vec![10.0, 8.0]);
        let mut view = test_view(2.0, 9.0);
        view.time = 49;
        buyer.set_activity(&view);
        assert!(buyer.active);
    }

    #[test]
    fn kaplan_stays_quiet_early_with_a_wide_spread() {
        let mut buyer = kaplan_agent(Side::Buyer, vec![10.0, 8.0]);
        let mut view = test_view(2.0, 9.0);
        view.time = 1;
        buyer.set_activity(&view);
        assert!(!buyer.active);
    }

    #[test]
    fn zip_quotes_follow_the_margin() {
        let mut agent = zip_agent(Side::Seller, vec![4.0]);
        let view = test_view(0.0, f64::INFINITY);
        let offer = agent.offer_price(&view, &mut rng()).unwrap();
        let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
        assert!((offer - 4.0 * (1.0 + zip.profit_margins[0])).abs() < 1e-12);
        assert!(offer >= 4.0);
    }

    #[test]
    fn zip_margins_stay_clamped_after_adaptation() {
        let mut buyer = zip_agent(Side::Buyer, vec![10.0, 8.0]);
        let mut seller = zip_agent(Side::Seller, vec![4.0, 6.0]);
        let mut rng = rng();
        let mut view = test_view(5.0, 7.0);
        view.transaction_possible = true;
        view.transaction_price = Some(6.0);
        view.last_shout = Some(crate::market::Shout { agent_id: 0, side: Side::Seller, price: 6.0 });

        for _ in 0..50 {
            buyer.adapt(&view, false, true, &mut rng);
            seller.adapt(&view, false, true, &mut rng);
        }
        let StrategyState::Zip(zb) = &buyer.strategy else { unreachable!() };
        let StrategyState::Zip(zs) = &seller.strategy else { unreachable!() };
        assert!(zb.profit_margins.iter().all(|&m| (-1.0..=0.0).contains(&m)));
        assert!(zs.profit_margins.iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn zip_momentum_is_held_on_the_first_tick() {
        let mut agent = zip_agent(Side::Buyer, vec![10.0]);
        let mut rng = rng();
        let mut view = test_view(5.0, 7.0);
        view.time = 0;
        view.transaction_possible = true;
        view.transaction_price = Some(6.0);
        view.last_shout = Some(crate::market::Shout { agent_id: 0, side: Side::Seller, price: 6.0 });

        let before = {
            let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
            zip.momentum.clone()
        };
        agent.adapt(&view, false, true, &mut rng);
        let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
        assert_eq!(zip.momentum, before);
    }

    #[test]
    fn zip_relaxes_on_a_quiet_final_tick_even_after_trading() {
        let mut agent = zip_agent(Side::Buyer, vec![10.0, 8.0]);
        agent.transaction_update(6.0);
        let before = {
            let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
            zip.profit_margins.clone()
        };

        // quiet tick: nothing crossed, but a shout stands from earlier
        let mut view = test_view(5.0, 7.0);
        view.last_shout = Some(crate::market::Shout { agent_id: 0, side: Side::Seller, price: 6.0 });
        agent.adapt(&view, true, false, &mut rng());

        let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
        assert_ne!(zip.profit_margins, before);
        assert!(zip.profit_margins.iter().all(|&m| (-1.0..=0.0).contains(&m)));
    }

    #[test]
    fn zip_without_a_recorded_shout_does_not_adapt() {
        let mut agent = zip_agent(Side::Buyer, vec![10.0]);
        let margins = {
            let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
            zip.profit_margins.clone()
        };
        let view = test_view(5.0, 7.0);
        agent.adapt(&view, true, false, &mut rng());
        let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
        assert_eq!(zip.profit_margins, margins);
    }

    #[test]
    fn period_reset_preserves_learning_state() {
        let mut agent = zip_agent(Side::Buyer, vec![10.0, 8.0]);
        agent.transaction_update(6.0);
        let margins = {
            let StrategyState::Zip(zip) = &mut agent.strategy else { unreachable!() };
            zip.momentum[0] = 0.5;
            zip.profit_margins.clone()
        };

        agent.reset_for_period();
        assert_eq!(agent.quantity, 0);
        assert_eq!(agent.prev_quantity, 1);
        assert_eq!(agent.prev_surplus, 4.0);
        assert_eq!(agent.surplus, 0.0);
        assert_eq!(agent.budget, 18.0);
        let StrategyState::Zip(zip) = &agent.strategy else { unreachable!() };
        assert_eq!(zip.profit_margins, margins);
        assert!(zip.momentum.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn kaplan_parameters_survive_period_reset() {
        let mut agent = kaplan_agent(Side::Seller, vec![4.0]);
        let StrategyState::Kaplan(k) = &agent.strategy else { unreachable!() };
        let params = (k.spread_ratio, k.profit_perc, k.time_frac);
        agent.reset_for_period();
        let StrategyState::Kaplan(k) = &agent.strategy else { unreachable!() };
        assert_eq!((k.spread_ratio, k.profit_perc, k.time_frac), params);
        assert_eq!(k.most, None);
    }

    #[test]
    fn profit_dispersion_is_squared_shortfall() {
        let mut agent = Agent::new(1, Side::Buyer, vec![10.0], 3.0, StrategyState::Zi);
        agent.surplus = 1.0;
        agent.set_profit_dispersion();
        assert_eq!(agent.profit_dispersion, 4.0);
    }
}
