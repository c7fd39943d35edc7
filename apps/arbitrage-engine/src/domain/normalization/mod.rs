//! Quote Normalization
//!
//! Turns untrusted [`RawQuote`]s into [`NormalizedQuote`]s:
//!
//! 1. Validity: non-empty exchange/symbol, positive prices, `ask >= bid`
//! 2. Staleness: wall-clock age must be within `[0, stale_interval]`
//! 3. Rounding: prices rounded to `rounding_scale` fractional digits,
//!    then re-validated
//! 4. Ordering: a strictly increasing monotonic time per (exchange, symbol)
//!
//! Invalid input is filtered, never raised. [`Normalizer::evaluate`] exposes
//! the reason so callers can log and count it.

mod clock;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};

use super::market_data::{NormalizedQuote, QuoteKey, RawQuote};

/// Rounding applied to prices. Half-way values move away from zero.
pub const PRICE_ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

// =============================================================================
// Configuration
// =============================================================================

/// Normalizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Maximum accepted wall-clock age of a raw quote.
    pub stale_interval: Duration,
    /// Minimum spacing between consecutive monotonic times of one key.
    pub minimum_gap: Duration,
    /// Fractional digits kept on bid/ask.
    pub rounding_scale: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            stale_interval: Duration::from_secs(5),
            minimum_gap: Duration::from_micros(1),
            rounding_scale: 8,
        }
    }
}

// =============================================================================
// Filter Reasons
// =============================================================================

/// Why a raw quote was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterReason {
    /// Exchange name is blank.
    EmptyExchange,
    /// Symbol is blank.
    EmptySymbol,
    /// Bid or ask is zero or negative.
    NonPositivePrice,
    /// Ask is below bid.
    CrossedQuote,
    /// Timestamp lies in the future of the local wall clock.
    FutureTimestamp,
    /// Older than the stale interval.
    Stale,
    /// Rounding pushed a price to zero.
    RoundedToZero,
    /// Rounding inverted bid and ask.
    RoundingInversion,
}

impl FilterReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyExchange => "empty_exchange",
            Self::EmptySymbol => "empty_symbol",
            Self::NonPositivePrice => "non_positive_price",
            Self::CrossedQuote => "crossed_quote",
            Self::FutureTimestamp => "future_timestamp",
            Self::Stale => "stale",
            Self::RoundedToZero => "rounded_to_zero",
            Self::RoundingInversion => "rounding_inversion",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Validates, rounds and orders raw quotes.
///
/// Owns the last monotonic time assigned per key. Mutation goes through
/// `&mut self`, so a single owner serializes all assignments.
#[derive(Debug)]
pub struct Normalizer {
    config: NormalizerConfig,
    clock: Arc<dyn Clock>,
    last_assigned: HashMap<QuoteKey, Duration>,
}

impl Normalizer {
    /// Create a normalizer backed by the system clock.
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a normalizer with an injected clock.
    #[must_use]
    pub fn with_clock(config: NormalizerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            last_assigned: HashMap::new(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Number of keys with an assigned monotonic time.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.last_assigned.len()
    }

    /// Normalize a raw quote, or `None` if it must be filtered.
    pub fn normalize(&mut self, raw: &RawQuote) -> Option<NormalizedQuote> {
        self.evaluate(raw).ok()
    }

    /// Normalize a raw quote, reporting why it was filtered.
    pub fn evaluate(&mut self, raw: &RawQuote) -> Result<NormalizedQuote, FilterReason> {
        Self::validate(raw)?;
        self.check_freshness(raw)?;

        let bid = raw
            .bid
            .round_dp_with_strategy(self.config.rounding_scale, PRICE_ROUNDING);
        let ask = raw
            .ask
            .round_dp_with_strategy(self.config.rounding_scale, PRICE_ROUNDING);
        if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
            return Err(FilterReason::RoundedToZero);
        }
        if ask < bid {
            return Err(FilterReason::RoundingInversion);
        }

        let key = QuoteKey::canonical(&raw.exchange, &raw.symbol);
        let monotonic_time = self.assign_monotonic(&key);

        Ok(NormalizedQuote {
            exchange: key.exchange,
            symbol: key.symbol,
            bid,
            ask,
            raw_timestamp: raw.timestamp,
            monotonic_time,
        })
    }

    fn validate(raw: &RawQuote) -> Result<(), FilterReason> {
        if raw.exchange.trim().is_empty() {
            return Err(FilterReason::EmptyExchange);
        }
        if raw.symbol.trim().is_empty() {
            return Err(FilterReason::EmptySymbol);
        }
        if raw.bid <= Decimal::ZERO || raw.ask <= Decimal::ZERO {
            return Err(FilterReason::NonPositivePrice);
        }
        if raw.ask < raw.bid {
            return Err(FilterReason::CrossedQuote);
        }
        Ok(())
    }

    fn check_freshness(&self, raw: &RawQuote) -> Result<(), FilterReason> {
        let age = self.clock.wall_now() - raw.timestamp;
        // Negative age means clock skew put the quote in our future.
        let Ok(age) = age.to_std() else {
            return Err(FilterReason::FutureTimestamp);
        };
        if age > self.config.stale_interval {
            return Err(FilterReason::Stale);
        }
        Ok(())
    }

    fn assign_monotonic(&mut self, key: &QuoteKey) -> Duration {
        let now = self.clock.monotonic_now();
        let gap = self.config.minimum_gap;

        let assigned = match self.last_assigned.get(key) {
            Some(&last) if now.saturating_sub(last) < gap => last + gap,
            _ => now,
        };

        self.last_assigned.insert(key.clone(), assigned);
        assigned
    }
}
