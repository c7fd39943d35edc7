//! Infrastructure layer: adapters and process plumbing.
//!
//! - `broadcast`: named fan-out topics with lag accounting
//! - `config`: environment-driven configuration
//! - `metrics`: Prometheus recorder and recording helpers
//! - `synthetic`: random-walk exchange connector
//! - `telemetry`: tracing subscriber and OTLP export

pub mod broadcast;
pub mod config;
pub mod metrics;
pub mod synthetic;
pub mod telemetry;
