//! Cross-Exchange Spread Detection
//!
//! Keeps the latest quote per exchange for every symbol and, on each update,
//! pairs the cheapest ask with the richest bid across exchanges.
//!
//! Ties on price resolve to the lexicographically smallest exchange name, so
//! the pick never depends on arrival order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::market_data::NormalizedQuote;

/// Spread detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadConfig {
    /// Minimum `(sell - buy) / buy` for a spread to be profitable (0.001 = 0.1%).
    pub min_spread_threshold: Decimal,
    /// Maximum monotonic distance between the two legs, in milliseconds.
    pub max_latency_ms: f64,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            min_spread_threshold: dec!(0.001),
            max_latency_ms: 500.0,
        }
    }
}

/// A cross-exchange price discrepancy for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadEvent {
    /// Pair symbol.
    pub symbol: String,
    /// Exchange with the lowest ask.
    pub buy_exchange: String,
    /// Exchange with the highest bid.
    pub sell_exchange: String,
    /// Ask on the buy exchange.
    pub buy_price: Decimal,
    /// Bid on the sell exchange.
    pub sell_price: Decimal,
    /// `(sell_price - buy_price) / buy_price` as a fraction.
    pub spread_percentage: Decimal,
    /// Monotonic distance between the two quotes in milliseconds.
    pub latency_ms: f64,
    /// Spread clears the threshold and the legs are close enough in time.
    pub is_profitable: bool,
    /// Wall-clock time of detection.
    pub detected_at: DateTime<Utc>,
}

/// Latest quote per exchange, per symbol.
#[derive(Debug, Default)]
pub struct SpreadBook {
    config: SpreadConfig,
    books: HashMap<String, BTreeMap<String, NormalizedQuote>>,
}

impl SpreadBook {
    /// Create an empty book.
    #[must_use]
    pub fn new(config: SpreadConfig) -> Self {
        Self {
            config,
            books: HashMap::new(),
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &SpreadConfig {
        &self.config
    }

    /// Number of exchanges currently quoting a symbol.
    #[must_use]
    pub fn exchange_count(&self, symbol: &str) -> usize {
        self.books.get(symbol).map_or(0, BTreeMap::len)
    }

    /// Number of symbols with at least one quote.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.books.len()
    }

    /// Record a quote and compute the resulting spread, if any.
    ///
    /// Returns `None` when fewer than two exchanges quote the symbol, when the
    /// best buy and best sell sit on the same exchange, or when the buy price
    /// is not positive.
    pub fn ingest(&mut self, quote: NormalizedQuote) -> Option<SpreadEvent> {
        let symbol = quote.symbol.clone();
        let book = self.books.entry(symbol.clone()).or_default();
        book.insert(quote.exchange.clone(), quote);

        if book.len() < 2 {
            return None;
        }

        // BTreeMap iterates exchanges in name order; strict comparisons keep
        // the first (smallest) name on ties.
        let mut best_buy: Option<&NormalizedQuote> = None;
        let mut best_sell: Option<&NormalizedQuote> = None;
        for candidate in book.values() {
            if best_buy.is_none_or(|b| candidate.ask < b.ask) {
                best_buy = Some(candidate);
            }
            if best_sell.is_none_or(|s| candidate.bid > s.bid) {
                best_sell = Some(candidate);
            }
        }
        let (buy, sell) = (best_buy?, best_sell?);

        if buy.exchange == sell.exchange || buy.ask <= Decimal::ZERO {
            return None;
        }

        let spread_percentage = (sell.bid - buy.ask) / buy.ask;
        let latency_ms = buy.monotonic_time.abs_diff(sell.monotonic_time).as_secs_f64() * 1000.0;
        let is_profitable = spread_percentage >= self.config.min_spread_threshold
            && latency_ms <= self.config.max_latency_ms;

        Some(SpreadEvent {
            symbol,
            buy_exchange: buy.exchange.clone(),
            sell_exchange: sell.exchange.clone(),
            buy_price: buy.ask,
            sell_price: sell.bid,
            spread_percentage,
            latency_ms,
            is_profitable,
            detected_at: Utc::now(),
        })
    }
}
