//! Application layer: ports and the worker services built on the domain.

pub mod ports;
pub mod services;
