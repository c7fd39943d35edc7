#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Arbitrage Engine - Quote Normalization and Opportunity Detection
//!
//! Ingests quotes from several exchanges, normalizes them into a single
//! time-ordered form, and looks for two kinds of opportunity: the same pair
//! priced apart on two exchanges, and a 3-leg cycle on one exchange that ends
//! with more USD than it started with. Profitable spreads are paper-traded.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Pure types and logic
//!   - `market_data`: Raw and normalized quotes, connection events
//!   - `normalization`: Validation, rounding, monotonic time assignment
//!   - `spread`: Cross-exchange spread book
//!   - `triangular`: Cycle catalog and evaluator
//!   - `simulation`: Paper-trading ledger
//!
//! - **Application**: Ports and worker services
//!   - `ports`: `ExchangeConnector`
//!   - `services`: One task per stateful component, ingestion bridge,
//!     connector supervisor, pipeline assembly
//!
//! - **Resilience**: Circuit breaker and reconnect backoff
//!
//! - **Infrastructure**: Adapters and process plumbing
//!   - `broadcast`: Event topics
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!   - `synthetic`: Random-walk connector for demos and tests
//!
//! # Data Flow
//!
//! ```text
//! Connector ──► Bridge ──► Normalizer ──► Router ──┬──► Spread Detector ──► spreads ──► Simulator
//!  (per symbol)                                   ├──► Triangular Detector ──► opportunities
//!                                                 └──► quotes
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote types and detection logic with no I/O.
pub mod domain;

/// Application layer - Ports and worker services.
pub mod application;

/// Resilience patterns - Circuit breaker and reconnect backoff.
pub mod resilience;

/// Infrastructure layer - Adapters and process plumbing.
pub mod infrastructure;

/// Error types.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{ConnectionEvent, ConnectionStatus, NormalizedQuote, RawQuote};
pub use domain::normalization::{
    Clock, FilterReason, ManualClock, Normalizer, NormalizerConfig, SystemClock,
};
pub use domain::simulation::{SimulatedTrade, SimulationConfig, SimulationStats, TradeSimulator};
pub use domain::spread::{SpreadBook, SpreadConfig, SpreadEvent};
pub use domain::triangular::{
    PathCatalog, PathEvaluator, TriangularConfig, TriangularOpportunity, TriangularPath,
};

// Ports and services
pub use application::ports::{ConnectorError, ExchangeConnector};
pub use application::services::{
    ConnectorSupervisor, IngestionBridge, NormalizerService, Pipeline, QuoteRouter, QuoteStream,
    SpreadDetectorService, SupervisorExit, TradeSimulatorService, TriangularDetectorService,
};

// Errors
pub use error::{IngestionError, ServiceError};

// Resilience
pub use resilience::{
    BreakerPhase, BreakerState, CircuitBreaker, CircuitBreakerConfig, ReconnectConfig,
    ReconnectError, ReconnectPolicy,
};

// Infrastructure
pub use infrastructure::broadcast::{BroadcastConfig, EventBus, Subscription};
pub use infrastructure::config::{ConfigError, PipelineConfig, ServiceSettings};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::synthetic::{SyntheticConfig, SyntheticConnector};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
