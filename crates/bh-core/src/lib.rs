//! Core domain model and configuration for the BeadHub coordination server.
//!
//! Everything here is plain data: no IO, no async. The durable store, the
//! ephemeral store, and the HTTP bridge all build on these types.

pub mod config;
pub mod error;
pub mod event;
pub mod origin;
pub mod policy;
pub mod types;
pub mod validate;

pub use error::Error;
