//! Auction market state: the outstanding quote book, best bid/ask with
//! price priority, per-period trade extrema, and the read-only snapshot
//! agents quote against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which side of the market an agent trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buyer,
    Seller,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Buyer => "buyer",
            Side::Seller => "seller",
        }
    }
}

/// One quote as it hit the market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shout {
    pub agent_id: usize,
    pub side: Side,
    pub price: f64,
}

/// Read-only market snapshot handed to agents each tick. Agents never touch
/// the market directly; all mutation goes through the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct MarketView {
    pub best_bid: f64,
    pub best_ask: f64,
    pub min_poss_price: f64,
    pub max_poss_price: f64,
    pub prev_min_trade: f64,
    pub prev_max_trade: f64,
    pub transaction_price: Option<f64>,
    pub transaction_possible: bool,
    pub last_shout: Option<Shout>,
    pub no_transactions: u32,
    pub time: usize,
    pub total_time: usize,
}

/// Mutable market state for one auction run.
///
/// Sentinels follow the book convention: `best_bid` is 0 and `best_ask`
/// +inf while the respective side is empty, `min_trade`/`max_trade` start
/// at +inf/0 each period, and the previous-period extrema start at
/// -inf/+inf so Kaplan's heuristics stay inert in the first period.
#[derive(Debug, Clone)]
pub struct Market {
    pub min_poss_price: f64,
    pub max_poss_price: f64,
    pub best_bid: f64,
    pub best_bid_id: Option<usize>,
    pub best_ask: f64,
    pub best_ask_id: Option<usize>,
    outstanding_bids: BTreeMap<usize, f64>,
    outstanding_asks: BTreeMap<usize, f64>,
    pub transaction_price: Option<f64>,
    pub transaction_possible: bool,
    pub last_shout: Option<Shout>,
    pub min_trade: f64,
    pub max_trade: f64,
    pub prev_min_trade: f64,
    pub prev_max_trade: f64,
    pub no_transactions: u32,
    /// Valuations of matched buyers and sellers in trade order, for the
    /// period's rank-correlation statistic.
    pub transaction_buy: Vec<f64>,
    pub transaction_sell: Vec<f64>,
}

impl Market {
    pub fn new(min_poss_price: f64, max_poss_price: f64) -> Self {
        Market {
            min_poss_price,
            max_poss_price,
            best_bid: 0.0,
            best_bid_id: None,
            best_ask: f64::INFINITY,
            best_ask_id: None,
            outstanding_bids: BTreeMap::new(),
            outstanding_asks: BTreeMap::new(),
            transaction_price: None,
            transaction_possible: false,
            last_shout: None,
            min_trade: f64::INFINITY,
            max_trade: 0.0,
            prev_min_trade: f64::NEG_INFINITY,
            prev_max_trade: f64::INFINITY,
            no_transactions: 0,
            transaction_buy: Vec::new(),
            transaction_sell: Vec::new(),
        }
    }

    pub fn view(&self, time: usize, total_time: usize) -> MarketView {
        MarketView {
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            min_poss_price: self.min_poss_price,
            max_poss_price: self.max_poss_price,
            prev_min_trade: self.prev_min_trade,
            prev_max_trade: self.prev_max_trade,
            transaction_price: self.transaction_price,
            transaction_possible: self.transaction_possible,
            last_shout: self.last_shout,
            no_transactions: self.no_transactions,
            time,
            total_time,
        }
    }

    /// Clears the cross flag at the start of a tick; the scheduler raises
    /// it again if this tick's shout executes.
    pub fn begin_tick(&mut self) {
        self.transaction_possible = false;
    }

    /// True iff the shout crosses the opposing standing quote.
    pub fn is_trade_possible(&self, side: Side, offer: f64) -> bool {
        match side {
            Side::Buyer => self.best_ask_id.is_some() && offer >= self.best_ask,
            Side::Seller => self.best_bid_id.is_some() && offer <= self.best_bid,
        }
    }

    /// Records the most recent quoting agent, read by ZIP adaptation.
    pub fn record_shout(&mut self, shout: Shout) {
        self.last_shout = Some(shout);
    }

    /// Enters a non-crossing shout into the book. The standing best is
    /// replaced only on strict improvement: a higher bid or a lower ask.
    pub fn update_best_price(&mut self, shout: Shout) {
        match shout.side {
            Side::Buyer if shout.price > self.best_bid => {
                self.best_bid = shout.price;
                self.best_bid_id = Some(shout.agent_id);
                self.outstanding_bids.insert(shout.agent_id, shout.price);
            }
            Side::Seller if shout.price < self.best_ask => {
                self.best_ask = shout.price;
                self.best_ask_id = Some(shout.agent_id);
                self.outstanding_asks.insert(shout.agent_id, shout.price);
            }
            _ => {}
        }
    }

    /// Books an executed trade: drops both matched outstanding quotes,
    /// recomputes the best bid/ask from the remaining outstanding set and
    /// folds the price into the period extrema.
    pub fn settle_trade(&mut self, buyer_id: usize, seller_id: usize, price: f64) {
        self.transaction_price = Some(price);
        self.transaction_possible = true;
        self.outstanding_bids.remove(&buyer_id);
        self.outstanding_asks.remove(&seller_id);
        self.recompute_best_bid();
        self.recompute_best_ask();

        if price < self.min_trade {
            self.min_trade = price;
        }
        if price > self.max_trade {
            self.max_trade = price;
        }
    }

    /// Logs the matched pair's valuations in trade order.
    pub fn log_matched_valuations(&mut self, buyer_valuation: f64, seller_valuation: f64) {
        self.transaction_buy.push(buyer_valuation);
        self.transaction_sell.push(seller_valuation);
    }

    fn recompute_best_bid(&mut self) {
        self.best_bid = 0.0;
        self.best_bid_id = None;
        for (&id, &price) in &self.outstanding_bids {
            if price > self.best_bid {
                self.best_bid = price;
                self.best_bid_id = Some(id);
            }
        }
    }

    fn recompute_best_ask(&mut self) {
        self.best_ask = f64::INFINITY;
        self.best_ask_id = None;
        for (&id, &price) in &self.outstanding_asks {
            if price < self.best_ask {
                self.best_ask = price;
                self.best_ask_id = Some(id);
            }
        }
    }

    /// Rolls the trade extrema into their previous-period slots and clears
    /// all per-period state.
    pub fn reset_period(&mut self) {
        self.transaction_price = None;
        self.outstanding_bids.clear();
        self.outstanding_asks.clear();
        self.best_bid = 0.0;
        self.best_bid_id = None;
        self.best_ask = f64::INFINITY;
        self.best_ask_id = None;
        self.prev_min_trade = self.min_trade;
        self.prev_max_trade = self.max_trade;
        self.min_trade = f64::INFINITY;
        self.max_trade = 0.0;
        self.transaction_buy.clear();
        self.transaction_sell.clear();
        self.last_shout = None;
        self.transaction_possible = false;
        self.no_transactions = 0;
    }

    /// The book invariant: a standing bid never meets or crosses a
    /// standing ask between ticks.
    pub fn book_is_consistent(&self) -> bool {
        self.best_bid_id.is_none() || self.best_ask_id.is_none() || self.best_bid < self.best_ask
    }
}
