//! # vaktpost-telemetry
//!
//! Logging setup for the vaktpost binaries and tests.

pub mod logging;

pub use logging::ServiceLogger;
