//! Port Interfaces
//!
//! Contracts infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ExchangeConnector`: one exchange's raw quote feed and lifecycle events

mod exchange_connector_port;

#[cfg(test)]
pub use exchange_connector_port::MockExchangeConnector;
pub use exchange_connector_port::{ConnectorError, ExchangeConnector};
