//! Domain layer: quote types and the pure detection and simulation logic.
//!
//! Nothing in here spawns tasks or touches I/O; the application layer wraps
//! each stateful type in its own worker.

pub mod market_data;
pub mod normalization;
pub mod simulation;
pub mod spread;
pub mod triangular;
