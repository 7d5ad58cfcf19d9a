use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use bh_core::types::{ProjectId, Reservation, WorkspaceId};

/// Outcome of a reserve call.
#[derive(Debug)]
pub enum ReserveOutcome {
    /// Fresh reservation.
    Acquired(Reservation),
    /// Same holder reserved again; expiry pushed out.
    Renewed(Reservation),
    /// Another workspace holds the path. Advisory only; the caller decides
    /// whether to warn or proceed.
    HeldByOther(Reservation),
}

/// Advisory file locks keyed by `(project, path)`, expiring after the
/// configured TTL. Expired entries are purged lazily on access and by the
/// background sweeper.
pub struct ReservationStore {
    ttl: Duration,
    entries: DashMap<(ProjectId, String), Reservation>,
}

impl ReservationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire or renew. The holder renews idempotently; a live reservation
    /// by someone else is reported, not overwritten.
    pub fn reserve(
        &self,
        project_id: ProjectId,
        path: String,
        workspace_id: WorkspaceId,
        alias: String,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ReserveOutcome {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(300));
        let key = (project_id, path.clone());
        let mut entry = self.entries.entry(key).or_insert_with(|| Reservation {
            project_id,
            path: path.clone(),
            workspace_id,
            alias: alias.clone(),
            acquired_at: now,
            expires_at: now + ttl,
            reason: reason.clone(),
        });

        let current = entry.value_mut();
        if current.is_expired(now) || current.workspace_id == workspace_id {
            let renewed = !current.is_expired(now)
                && current.workspace_id == workspace_id
                && current.acquired_at < now;
            if current.is_expired(now) || current.workspace_id != workspace_id {
                current.workspace_id = workspace_id;
                current.alias = alias;
                current.acquired_at = now;
                current.reason = reason;
            } else if reason.is_some() {
                current.reason = reason;
            }
            current.expires_at = now + ttl;
            let snapshot = current.clone();
            if renewed {
                ReserveOutcome::Renewed(snapshot)
            } else {
                ReserveOutcome::Acquired(snapshot)
            }
        } else {
            ReserveOutcome::HeldByOther(current.clone())
        }
    }

    /// The live reservation on a path, if any. Expired entries are purged on
    /// the way out.
    pub fn holder(
        &self,
        project_id: ProjectId,
        path: &str,
        now: DateTime<Utc>,
    ) -> Option<Reservation> {
        let key = (project_id, path.to_string());
        // The read guard must drop before the remove below touches the same
        // shard.
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Some(entry.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Release by the holder. Returns the released reservation; releasing a
    /// path held by someone else (or nobody) is a no-op.
    pub fn release(
        &self,
        project_id: ProjectId,
        path: &str,
        workspace_id: WorkspaceId,
    ) -> Option<Reservation> {
        let key = (project_id, path.to_string());
        let held = match self.entries.get(&key) {
            Some(entry) if entry.workspace_id == workspace_id => true,
            _ => false,
        };
        if held {
            self.entries.remove(&key).map(|(_, r)| r)
        } else {
            None
        }
    }

    /// Live reservations for a project.
    pub fn list(&self, project_id: ProjectId, now: DateTime<Utc>) -> Vec<Reservation> {
        let mut live: Vec<Reservation> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == project_id && !e.is_expired(now))
            .map(|e| e.value().clone())
            .collect();
        live.sort_by(|a, b| a.path.cmp(&b.path));
        live
    }

    /// Drop expired entries; returns how many were purged.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(ProjectId, String)> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        count
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn store() -> ReservationStore {
        ReservationStore::new(Duration::from_secs(300))
    }

    #[test]
    fn acquire_then_other_holder_is_reported() {
        let store = store();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let outcome = store.reserve(
            project,
            "src/x.py".into(),
            alice,
            "alice".into(),
            None,
            now,
        );
        assert!(matches!(outcome, ReserveOutcome::Acquired(_)));

        let outcome = store.reserve(project, "src/x.py".into(), bob, "bob".into(), None, now);
        match outcome {
            ReserveOutcome::HeldByOther(held) => assert_eq!(held.alias, "alice"),
            other => panic!("expected held: {other:?}"),
        }
    }

    #[test]
    fn holder_renewal_extends_expiry() {
        let store = store();
        let project = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let t0 = Utc::now();

        store.reserve(project, "src/x.py".into(), alice, "alice".into(), None, t0);
        let t1 = t0 + chrono::Duration::seconds(100);
        let outcome = store.reserve(project, "src/x.py".into(), alice, "alice".into(), None, t1);
        match outcome {
            ReserveOutcome::Renewed(r) => {
                assert_eq!(r.expires_at, t1 + chrono::Duration::seconds(300))
            }
            other => panic!("expected renewed: {other:?}"),
        }
    }

    #[test]
    fn expired_reservation_is_reacquirable() {
        let store = store();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        store.reserve(project, "src/x.py".into(), alice, "alice".into(), None, t0);
        let t1 = t0 + chrono::Duration::seconds(301);
        assert!(store.holder(project, "src/x.py", t1).is_none());

        let outcome = store.reserve(project, "src/x.py".into(), bob, "bob".into(), None, t1);
        match outcome {
            ReserveOutcome::Acquired(r) => assert_eq!(r.alias, "bob"),
            other => panic!("expected acquired: {other:?}"),
        }
    }

    #[test]
    fn release_requires_holder() {
        let store = store();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        store.reserve(project, "src/x.py".into(), alice, "alice".into(), None, now);
        assert!(store.release(project, "src/x.py", bob).is_none());
        assert!(store.release(project, "src/x.py", alice).is_some());
        assert!(store.holder(project, "src/x.py", now).is_none());
    }

    #[test]
    fn sweep_purges_expired() {
        let store = store();
        let project = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let t0 = Utc::now();

        store.reserve(project, "a.rs".into(), alice, "alice".into(), None, t0);
        store.reserve(
            project,
            "b.rs".into(),
            alice,
            "alice".into(),
            None,
            t0 - chrono::Duration::seconds(600),
        );
        assert_eq!(store.sweep(t0), 1);
        assert_eq!(store.list(project, t0).len(), 1);
    }
}
