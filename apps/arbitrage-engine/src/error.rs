//! Error types shared across services.
//!
//! Filtering decisions (invalid or stale quotes, incomplete triangular paths)
//! are not errors and never show up here. These types cover the cases where a
//! caller genuinely cannot proceed.

use thiserror::Error;

/// A worker task is no longer reachable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The worker has shut down (cancelled or panicked).
    #[error("{service} worker has stopped")]
    Stopped {
        /// Worker name.
        service: &'static str,
    },
}

impl ServiceError {
    /// Build a `Stopped` error for the named worker.
    #[must_use]
    pub const fn stopped(service: &'static str) -> Self {
        Self::Stopped { service }
    }
}

/// Terminal error on an ingestion stream for one (exchange, symbol).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    /// The connector reported a failed connection.
    #[error("connection to {exchange} failed for {symbol}: {reason}")]
    ConnectionFailed {
        /// Exchange.
        exchange: String,
        /// Symbol.
        symbol: String,
        /// Reason reported by the connector.
        reason: String,
    },

    /// The connector dropped an established connection.
    #[error("connection to {exchange} lost for {symbol}: {reason}")]
    ConnectionLost {
        /// Exchange.
        exchange: String,
        /// Symbol.
        symbol: String,
        /// Reason reported by the connector.
        reason: String,
    },

    /// The subscription call failed.
    #[error("subscription to {symbol} on {exchange} failed: {reason}")]
    SubscriptionFailed {
        /// Exchange.
        exchange: String,
        /// Symbol.
        symbol: String,
        /// Connector error message.
        reason: String,
    },

    /// The normalizer worker is gone.
    #[error("normalizer unavailable for {exchange}:{symbol}")]
    PipelineUnavailable {
        /// Exchange.
        exchange: String,
        /// Symbol.
        symbol: String,
    },
}

impl IngestionError {
    /// Exchange the stream belonged to.
    #[must_use]
    pub fn exchange(&self) -> &str {
        match self {
            Self::ConnectionFailed { exchange, .. }
            | Self::ConnectionLost { exchange, .. }
            | Self::SubscriptionFailed { exchange, .. }
            | Self::PipelineUnavailable { exchange, .. } => exchange,
        }
    }

    /// Symbol the stream belonged to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::ConnectionFailed { symbol, .. }
            | Self::ConnectionLost { symbol, .. }
            | Self::SubscriptionFailed { symbol, .. }
            | Self::PipelineUnavailable { symbol, .. } => symbol,
        }
    }

    /// Metric label for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::SubscriptionFailed { .. } => "subscription_failed",
            Self::PipelineUnavailable { .. } => "pipeline_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingestion_error_context() {
        let err = IngestionError::ConnectionLost {
            exchange: "kraken".to_string(),
            symbol: "BTC-USD".to_string(),
            reason: "socket closed".to_string(),
        };
        assert_eq!(err.exchange(), "kraken");
        assert_eq!(err.symbol(), "BTC-USD");
        assert_eq!(err.kind(), "connection_lost");
        assert_eq!(
            err.to_string(),
            "connection to kraken lost for BTC-USD: socket closed"
        );
    }

    #[test]
    fn service_error_display() {
        assert_eq!(
            ServiceError::stopped("normalizer").to_string(),
            "normalizer worker has stopped"
        );
    }
}
