use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bh_core::event::Event;
use bh_core::types::ProjectId;
use dashmap::DashMap;

/// Events a slow subscriber may lag behind before the bus starts dropping
/// on its buffer.
pub const SUBSCRIBER_BUFFER: usize = 64;

struct Slot {
    /// Per-subscriber sequence, advanced for every event addressed to the
    /// subscriber, including dropped ones, so gaps stay visible.
    seq: Arc<AtomicU64>,
    tx: flume::Sender<Event>,
}

/// A broadcast-style event bus with one channel set per project.
///
/// Each call to [`EventBus::subscribe`] creates a bounded receiver that sees
/// every event published to that project from then on. Senders whose
/// receivers are gone are pruned on the next publish. Cloning is cheap; the
/// internals sit behind an `Arc`.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<DashMap<ProjectId, Mutex<Vec<Slot>>>>,
}

/// One subscription: a bounded receiver of events already stamped with this
/// subscriber's sequence numbers.
pub struct Subscriber {
    pub rx: flume::Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Register a subscriber for one project's events.
    pub fn subscribe(&self, project_id: ProjectId) -> Subscriber {
        let (tx, rx) = flume::bounded(SUBSCRIBER_BUFFER);
        let entry = self
            .channels
            .entry(project_id)
            .or_insert_with(|| Mutex::new(Vec::new()));
        entry.lock().expect("event bus lock poisoned").push(Slot {
            seq: Arc::new(AtomicU64::new(0)),
            tx,
        });
        Subscriber { rx }
    }

    /// Publish to every live subscriber of the event's project.
    ///
    /// Full buffers drop the event for that subscriber only; the sequence
    /// still advances, so the subscriber sees a gap and re-reads REST state.
    pub fn publish(&self, event: Event) {
        let Some(entry) = self.channels.get(&event.project_id) else {
            return;
        };
        let mut senders = entry.lock().expect("event bus lock poisoned");
        senders.retain(|slot| {
            let mut stamped = event.clone();
            stamped.seq = Some(slot.seq.fetch_add(1, Ordering::Relaxed));
            match slot.tx.try_send(stamped) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(_)) => {
                    tracing::debug!(
                        project_id = %event.project_id,
                        event_type = event.event_type.as_str(),
                        "subscriber buffer full, dropping event"
                    );
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// Number of live subscribers for a project.
    pub fn subscriber_count(&self, project_id: ProjectId) -> usize {
        self.channels
            .get(&project_id)
            .map(|entry| {
                let mut senders = entry.lock().expect("event bus lock poisoned");
                senders.retain(|slot| !slot.tx.is_disconnected());
                senders.len()
            })
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::event::EventType;
    use uuid::Uuid;

    fn event(project: Uuid) -> Event {
        Event::new(EventType::SyncCompleted, project, "demo")
    }

    #[test]
    fn subscriber_sees_only_its_project() {
        let bus = EventBus::new();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let sub = bus.subscribe(p1);

        bus.publish(event(p2));
        bus.publish(event(p1));

        let received = sub.rx.try_recv().unwrap();
        assert_eq!(received.project_id, p1);
        assert!(sub.rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let bus = EventBus::new();
        let project = Uuid::new_v4();
        let sub = bus.subscribe(project);
        assert_eq!(bus.subscriber_count(project), 1);

        drop(sub);
        bus.publish(event(project));
        assert_eq!(bus.subscriber_count(project), 0);
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let project = Uuid::new_v4();
        let sub = bus.subscribe(project);

        for _ in 0..SUBSCRIBER_BUFFER + 8 {
            bus.publish(event(project));
        }
        // Subscriber still connected, buffer capped.
        assert_eq!(bus.subscriber_count(project), 1);
        let mut drained = 0;
        while sub.rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, SUBSCRIBER_BUFFER);
    }

    #[test]
    fn sequence_is_contiguous_and_gaps_survive_drops() {
        let bus = EventBus::new();
        let project = Uuid::new_v4();
        let sub = bus.subscribe(project);

        for _ in 0..3 {
            bus.publish(event(project));
        }
        let seqs: Vec<u64> = (0..3).map(|_| sub.rx.try_recv().unwrap().seq.unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        // Overflow the buffer; the next received sequence skips the dropped
        // range.
        for _ in 0..SUBSCRIBER_BUFFER + 5 {
            bus.publish(event(project));
        }
        let first = sub.rx.try_recv().unwrap().seq.unwrap();
        assert_eq!(first, 3);
        let mut last = first;
        while let Ok(ev) = sub.rx.try_recv() {
            last = ev.seq.unwrap();
        }
        assert_eq!(last, 3 + SUBSCRIBER_BUFFER as u64 - 1);

        bus.publish(event(project));
        let after_drop = sub.rx.try_recv().unwrap().seq.unwrap();
        // 5 events were dropped while the buffer was full.
        assert_eq!(after_drop, last + 5 + 1);
    }
}
