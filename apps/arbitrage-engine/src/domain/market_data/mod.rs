//! Market Data Types
//!
//! Canonical quote types flowing through the pipeline, plus the connection
//! events connectors publish alongside their raw quotes.
//!
//! Pair symbols are written `BASE-QUOTE`: `ETH-BTC` prices one ETH in BTC.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Separator between base and quote asset in a pair symbol.
pub const PAIR_SEPARATOR: char = '-';

// =============================================================================
// Quotes
// =============================================================================

/// Untrusted quote as produced by an exchange connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuote {
    /// Exchange name as reported by the connector.
    pub exchange: String,
    /// Pair symbol as reported by the connector.
    pub symbol: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Wall-clock time the exchange stamped on the quote.
    pub timestamp: DateTime<Utc>,
}

impl RawQuote {
    /// Create a raw quote stamped with the current wall-clock time.
    #[must_use]
    pub fn now(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            bid,
            ask,
            timestamp: Utc::now(),
        }
    }
}

/// Validated, rounded quote with a strictly increasing per-key monotonic time.
///
/// Created once by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    /// Lowercased exchange name.
    pub exchange: String,
    /// Uppercased pair symbol.
    pub symbol: String,
    /// Rounded best bid.
    pub bid: Decimal,
    /// Rounded best ask (always `>= bid`).
    pub ask: Decimal,
    /// Wall-clock time carried over from the raw quote.
    pub raw_timestamp: DateTime<Utc>,
    /// Time since the process clock origin, strictly increasing per key.
    pub monotonic_time: Duration,
}

impl NormalizedQuote {
    /// Mid price.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Key this quote is ordered under.
    #[must_use]
    pub fn key(&self) -> QuoteKey {
        QuoteKey {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

/// Ordering key: one monotonic sequence exists per (exchange, symbol).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuoteKey {
    /// Lowercased exchange.
    pub exchange: String,
    /// Uppercased symbol.
    pub symbol: String,
}

impl QuoteKey {
    /// Build the canonical key for an arbitrary exchange/symbol spelling.
    #[must_use]
    pub fn canonical(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: canonical_exchange(exchange),
            symbol: canonical_symbol(symbol),
        }
    }
}

impl fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Canonical exchange spelling (trimmed, lowercase).
#[must_use]
pub fn canonical_exchange(exchange: &str) -> String {
    exchange.trim().to_lowercase()
}

/// Canonical symbol spelling (trimmed, uppercase).
#[must_use]
pub fn canonical_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Compose a pair symbol from two asset codes.
#[must_use]
pub fn pair_symbol(base: &str, quote: &str) -> String {
    format!("{base}{PAIR_SEPARATOR}{quote}")
}

/// Split a pair symbol into `(base, quote)`.
#[must_use]
pub fn split_pair(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once(PAIR_SEPARATOR)?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

// =============================================================================
// Connection Events
// =============================================================================

/// Connection status reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Streaming.
    Connected,
    /// Cleanly disconnected.
    Disconnected,
    /// Connection attempt failed.
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Failed(reason) => write!(f, "FAILED({reason})"),
        }
    }
}

/// Lifecycle event published by a connector next to its quote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The transport dropped.
    Disconnected {
        /// Reason given by the connector, if any.
        reason: Option<String>,
    },
    /// The connector changed status.
    StatusChanged(ConnectionStatus),
    /// Keep-alive received.
    ReceivedHeartbeat,
}
