//! Exchange Connector Port (Driven Port)
//!
//! Interface to one exchange's market data connection. Protocol parsing and
//! socket management live behind it.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::market_data::{ConnectionEvent, RawQuote};

/// Connector error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// The exchange refused or failed the subscription.
    #[error("Subscription to {symbol} rejected: {message}")]
    SubscriptionRejected {
        /// Symbol requested.
        symbol: String,
        /// Error details.
        message: String,
    },

    /// Transport-level failure.
    #[error("Connector transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// The connector has been shut down.
    #[error("Connector closed")]
    Closed,
}

/// Port for one exchange's market data.
///
/// Receivers returned by `raw_quotes` and `connection_events` are independent
/// subscriptions; a receiver obtained before `subscribe` is called sees every
/// quote published afterwards.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Exchange name.
    fn exchange(&self) -> String;

    /// Subscribe to the raw quote feed.
    fn raw_quotes(&self) -> broadcast::Receiver<RawQuote>;

    /// Subscribe to connection lifecycle events.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Ask the exchange to start streaming `symbol`.
    async fn subscribe(&self, symbol: &str) -> Result<(), ConnectorError>;
}
