//! Logging and request instrumentation for the BeadHub server.

pub mod logging;
pub mod metrics;
pub mod middleware;
