//! Domain engines: the coordination logic between the HTTP boundary and the
//! stores. Each engine owns one concern and publishes its events on the bus.

pub mod claims;
pub mod escalation;
pub mod keys;
pub mod policy;
pub mod ready;
pub mod registry;
pub mod sync;
