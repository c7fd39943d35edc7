//! Triangular Arbitrage
//!
//! Pure evaluation of 3-leg cycles on a single exchange. A cycle starts and
//! ends in USD:
//!
//! 1. USD -> START at the `START-USD` ask
//! 2. START -> INTERMEDIATE at the `START-INTERMEDIATE` bid
//! 3. INTERMEDIATE -> USD at the `INTERMEDIATE-USD` bid
//!
//! A fee is deducted after every leg. When the direct cross is not quoted it
//! is derived from `INTERMEDIATE-START` by inverting both sides.

mod catalog;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub use catalog::{PathCatalog, SETTLEMENT_ASSET, START_ASSETS, TriangularPath};

use super::market_data::NormalizedQuote;

/// Latest quotes on one exchange, keyed by symbol.
pub type ExchangeQuotes = HashMap<String, NormalizedQuote>;

/// Triangular detector parameters.
#[derive(Debug, Clone)]
pub struct TriangularConfig {
    /// USD notional pushed through every cycle.
    pub start_amount: Decimal,
    /// Default per-leg fee (0.001 = 0.1%).
    pub fee_percentage: Decimal,
    /// Per-exchange fee overriding the default.
    pub fee_overrides: HashMap<String, Decimal>,
    /// Minimum profit as a fraction of `start_amount`.
    pub min_profit_threshold: Decimal,
    /// Quotes older than this (monotonic) are treated as missing.
    pub max_quote_age: Duration,
    /// Upper bound on in-flight path evaluations per batch.
    pub max_concurrent_evaluations: usize,
    /// Period of the full re-evaluation sweep.
    pub sweep_interval: Duration,
    /// Upper bound on batches running at once; further work is coalesced
    /// per exchange until one finishes.
    pub max_pending_batches: usize,
}

impl Default for TriangularConfig {
    fn default() -> Self {
        Self {
            start_amount: dec!(1000),
            fee_percentage: dec!(0.001),
            fee_overrides: HashMap::new(),
            min_profit_threshold: dec!(0.001),
            max_quote_age: Duration::from_secs(5),
            max_concurrent_evaluations: 16,
            sweep_interval: Duration::from_secs(1),
            max_pending_batches: 32,
        }
    }
}

impl TriangularConfig {
    /// Per-leg fee charged on `exchange`.
    #[must_use]
    pub fn fee_for(&self, exchange: &str) -> Decimal {
        self.fee_overrides
            .get(exchange)
            .copied()
            .unwrap_or(self.fee_percentage)
    }
}

/// Result of simulating one cycle on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangularOpportunity {
    /// Exchange the cycle was evaluated on.
    pub exchange: String,
    /// `[START, INTERMEDIATE, USD, START]`.
    pub path: [String; 4],
    /// USD in.
    pub start_amount: Decimal,
    /// USD out after three legs and fees.
    pub end_amount: Decimal,
    /// `end_amount - start_amount`.
    pub profit: Decimal,
    /// `profit / start_amount * 100`.
    pub profit_percentage: Decimal,
    /// Positive profit clearing the threshold.
    pub is_profitable: bool,
    /// Wall-clock time of evaluation.
    pub timestamp: DateTime<Utc>,
}

/// Bid/ask used for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Book {
    bid: Decimal,
    ask: Decimal,
}

/// Stateless cycle evaluator.
#[derive(Debug, Clone)]
pub struct PathEvaluator {
    config: TriangularConfig,
}

impl PathEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub const fn new(config: TriangularConfig) -> Self {
        Self { config }
    }

    /// Parameters in use.
    #[must_use]
    pub const fn config(&self) -> &TriangularConfig {
        &self.config
    }

    /// Simulate `path` on `exchange` with the quotes known at monotonic time `now`.
    ///
    /// Returns `None` when a leg is missing or stale, or when the arithmetic
    /// overflows.
    #[must_use]
    pub fn evaluate(
        &self,
        exchange: &str,
        path: &TriangularPath,
        quotes: &ExchangeQuotes,
        now: Duration,
    ) -> Option<TriangularOpportunity> {
        let start_usd = self.fresh(quotes, &path.start_usd, now)?;
        let intermediate_usd = self.fresh(quotes, &path.intermediate_usd, now)?;
        let cross = self.cross_book(path, quotes, now)?;

        let keep = Decimal::ONE.checked_sub(self.config.fee_for(exchange))?;
        let start_amount = self.config.start_amount;

        let start_units = start_amount
            .checked_div(start_usd.ask)?
            .checked_mul(keep)?;
        let intermediate_units = start_units.checked_mul(cross.bid)?.checked_mul(keep)?;
        let end_amount = intermediate_units
            .checked_mul(intermediate_usd.bid)?
            .checked_mul(keep)?;

        let profit = end_amount.checked_sub(start_amount)?;
        let profit_percentage = profit
            .checked_div(start_amount)?
            .checked_mul(Decimal::ONE_HUNDRED)?;
        let is_profitable = profit > Decimal::ZERO
            && profit_percentage >= self.config.min_profit_threshold * Decimal::ONE_HUNDRED;

        Some(TriangularOpportunity {
            exchange: exchange.to_string(),
            path: path.assets.clone(),
            start_amount,
            end_amount,
            profit,
            profit_percentage,
            is_profitable,
            timestamp: Utc::now(),
        })
    }

    fn fresh(&self, quotes: &ExchangeQuotes, symbol: &str, now: Duration) -> Option<Book> {
        let quote = quotes.get(symbol)?;
        if now.saturating_sub(quote.monotonic_time) > self.config.max_quote_age {
            return None;
        }
        Some(Book {
            bid: quote.bid,
            ask: quote.ask,
        })
    }

    fn cross_book(&self, path: &TriangularPath, quotes: &ExchangeQuotes, now: Duration) -> Option<Book> {
        if let Some(direct) = self.fresh(quotes, &path.cross, now) {
            return Some(direct);
        }
        let inverse = self.fresh(quotes, &path.inverse_cross, now)?;
        Some(Book {
            bid: Decimal::ONE.checked_div(inverse.ask)?,
            ask: Decimal::ONE.checked_div(inverse.bid)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> NormalizedQuote {
        NormalizedQuote {
            exchange: "kraken".to_string(),
            symbol: symbol.to_string(),
            bid,
            ask,
            raw_timestamp: Utc::now(),
            monotonic_time: Duration::from_secs(10),
        }
    }

    fn book(entries: &[NormalizedQuote]) -> ExchangeQuotes {
        entries
            .iter()
            .map(|q| (q.symbol.clone(), q.clone()))
            .collect()
    }

    fn now() -> Duration {
        Duration::from_secs(10)
    }

    #[test]
    fn profitable_cycle_with_direct_cross() {
        let evaluator = PathEvaluator::new(TriangularConfig::default());
        let quotes = book(&[
            quote("BTC-USD", dec!(49990), dec!(50000)),
            quote("BTC-ETH", dec!(20), dec!(20.1)),
            quote("ETH-USD", dec!(2600), dec!(2601)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");

        let opportunity = evaluator.evaluate("kraken", &path, &quotes, now()).unwrap();

        // 1000 / 50000 * 0.999 * 20 * 0.999 * 2600 * 0.999
        assert_eq!(opportunity.end_amount, dec!(1036.88311896));
        assert_eq!(opportunity.profit, dec!(36.88311896));
        assert_eq!(opportunity.profit_percentage, dec!(3.688311896));
        assert!(opportunity.is_profitable);
        assert_eq!(opportunity.path, ["BTC", "ETH", "USD", "BTC"].map(String::from));
    }

    #[test]
    fn inverse_cross_is_derived() {
        let evaluator = PathEvaluator::new(TriangularConfig {
            fee_percentage: Decimal::ZERO,
            ..Default::default()
        });
        let quotes = book(&[
            quote("BTC-USD", dec!(50000), dec!(50000)),
            // ETH-BTC ask 0.04 -> BTC-ETH bid 25
            quote("ETH-BTC", dec!(0.04), dec!(0.04)),
            quote("ETH-USD", dec!(2000), dec!(2000)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");

        let opportunity = evaluator.evaluate("kraken", &path, &quotes, now()).unwrap();
        assert_eq!(opportunity.end_amount, dec!(1000));
        assert_eq!(opportunity.profit, Decimal::ZERO);
        assert!(!opportunity.is_profitable);
    }

    #[test]
    fn missing_intermediate_usd_skips_path() {
        let evaluator = PathEvaluator::new(TriangularConfig::default());
        let quotes = book(&[
            quote("BTC-USD", dec!(49990), dec!(50000)),
            quote("BTC-ETH", dec!(20), dec!(20.1)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");
        assert!(evaluator.evaluate("kraken", &path, &quotes, now()).is_none());
    }

    #[test]
    fn stale_leg_counts_as_missing() {
        let evaluator = PathEvaluator::new(TriangularConfig::default());
        let quotes = book(&[
            quote("BTC-USD", dec!(49990), dec!(50000)),
            quote("BTC-ETH", dec!(20), dec!(20.1)),
            quote("ETH-USD", dec!(2600), dec!(2601)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");
        let later = now() + Duration::from_secs(6);
        assert!(evaluator.evaluate("kraken", &path, &quotes, later).is_none());
    }

    #[test]
    fn small_profit_below_threshold_is_not_profitable() {
        let evaluator = PathEvaluator::new(TriangularConfig {
            fee_percentage: Decimal::ZERO,
            min_profit_threshold: dec!(0.01),
            ..Default::default()
        });
        let quotes = book(&[
            quote("BTC-USD", dec!(50000), dec!(50000)),
            quote("BTC-ETH", dec!(25), dec!(25)),
            // 0.5% edge, threshold is 1%
            quote("ETH-USD", dec!(2010), dec!(2010)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");

        let opportunity = evaluator.evaluate("kraken", &path, &quotes, now()).unwrap();
        assert_eq!(opportunity.profit, dec!(5));
        assert!(!opportunity.is_profitable);
    }

    #[test]
    fn per_exchange_fee_override() {
        let mut config = TriangularConfig {
            fee_percentage: Decimal::ZERO,
            ..Default::default()
        };
        config.fee_overrides.insert("binance".to_string(), dec!(0.5));
        let evaluator = PathEvaluator::new(config);
        let quotes = book(&[
            quote("BTC-USD", dec!(50000), dec!(50000)),
            quote("BTC-ETH", dec!(25), dec!(25)),
            quote("ETH-USD", dec!(2000), dec!(2000)),
        ]);
        let path = TriangularPath::new("BTC", "ETH");

        let free = evaluator.evaluate("kraken", &path, &quotes, now()).unwrap();
        let taxed = evaluator.evaluate("binance", &path, &quotes, now()).unwrap();
        assert_eq!(free.end_amount, dec!(1000));
        assert_eq!(taxed.end_amount, dec!(125));
    }

    #[test]
    fn overflow_skips_path() {
        let evaluator = PathEvaluator::new(TriangularConfig {
            fee_percentage: Decimal::ZERO,
            ..Default::default()
        });
        let quotes = book(&[
            quote("BTC-USD", dec!(0.0000000000000000000001), dec!(0.0000000000000000000001)),
            quote("BTC-ETH", Decimal::MAX, Decimal::MAX),
            quote("ETH-USD", Decimal::MAX, Decimal::MAX),
        ]);
        let path = TriangularPath::new("BTC", "ETH");
        assert!(evaluator.evaluate("kraken", &path, &quotes, now()).is_none());
    }
}
