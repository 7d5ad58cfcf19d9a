//! The ephemeral store: everything that may be wiped at any time.
//!
//! Presence TTLs, file reservations, chat-wait signals, inbox wake channels,
//! and the per-project event channels all live in process memory. Recovery
//! after a wipe rebuilds presence from the durable `last_seen_at` column;
//! reservations simply expire and in-flight chat waits resolve by deadline.

mod bus;
mod presence;
mod reservations;
mod waits;

pub use bus::{EventBus, Subscriber, SUBSCRIBER_BUFFER};
pub use presence::{PresenceCache, PresenceEntry};
pub use reservations::{ReservationStore, ReserveOutcome};
pub use waits::{WaitHandle, WaitRegistry, WaitRelease};

use std::sync::Arc;

/// Bundle of the ephemeral structures, created once at startup and shared by
/// handlers and background tasks.
#[derive(Clone)]
pub struct Ephemeral {
    pub presence: Arc<PresenceCache>,
    pub reservations: Arc<ReservationStore>,
    pub waits: Arc<WaitRegistry>,
    pub bus: EventBus,
}

impl Ephemeral {
    pub fn new(presence_ttl: std::time::Duration, reservation_ttl: std::time::Duration) -> Self {
        Self {
            presence: Arc::new(PresenceCache::new(presence_ttl)),
            reservations: Arc::new(ReservationStore::new(reservation_ttl)),
            waits: Arc::new(WaitRegistry::new()),
            bus: EventBus::new(),
        }
    }

    /// Drop every ephemeral structure, as a cache wipe would. Waits are
    /// cancelled (their holders see a deadline-style release).
    pub fn clear_all(&self) {
        self.presence.clear();
        self.reservations.clear();
        self.waits.clear();
    }
}
