//! Application Services
//!
//! Each stateful component runs as one task that owns its state and is
//! reached through a cloneable handle over a bounded command queue.
//!
//! - `NormalizerService`: validates raw quotes and assigns monotonic times
//! - `SpreadDetectorService`: cross-exchange spreads, published per update
//! - `TriangularDetectorService`: 3-leg cycles evaluated in bounded batches
//! - `TradeSimulatorService`: paper trades profitable spreads
//! - `IngestionBridge`: per-symbol quote streams from a connector
//! - `ConnectorSupervisor`: restarts ingestion under breaker and backoff
//! - `Pipeline`: wires everything under one cancellation token

pub mod ingestion;
pub mod normalizer;
pub mod pipeline;
pub mod router;
pub mod spread_detector;
pub mod supervisor;
pub mod trade_simulator;
pub mod triangular_detector;

pub use ingestion::{IngestionBridge, IngestionResult, QuoteStream};
pub use normalizer::NormalizerService;
pub use pipeline::{Pipeline, SupervisorOutcome};
pub use router::QuoteRouter;
pub use spread_detector::SpreadDetectorService;
pub use supervisor::{ConnectorSupervisor, SupervisorExit};
pub use trade_simulator::TradeSimulatorService;
pub use triangular_detector::TriangularDetectorService;
