//! Resilience patterns for exchange connections.
//!
//! Circuit breakers isolate a failing exchange; the reconnect policy spaces
//! out restarts while the breaker allows them.

mod circuit_breaker;
mod reconnect;

pub use circuit_breaker::{
    BreakerPhase, BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
