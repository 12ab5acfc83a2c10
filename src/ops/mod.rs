//! Operations tooling.
//!
//! - `telemetry` - Structured logging setup

pub mod telemetry;

pub use telemetry::*;
