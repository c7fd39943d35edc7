//! Configuration Module
//!
//! Environment-driven configuration for the whole pipeline.

mod settings;

pub use settings::{ConfigError, PipelineConfig, ServiceSettings};
