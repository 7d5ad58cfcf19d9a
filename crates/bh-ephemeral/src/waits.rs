use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use bh_core::types::{ChatMessage, WorkspaceId};

/// Why a chat wait ended.
#[derive(Debug, Clone)]
pub enum WaitRelease {
    /// A non-sender message arrived in the session.
    Reply(ChatMessage),
    /// A peer signalled leave without a qualifying reply.
    PeerLeft { alias: String },
    /// The deadline passed.
    Deadline,
    /// The wait was superseded or torn down (client disconnect, wipe).
    Cancelled,
}

struct WaitEntry {
    tx: flume::Sender<WaitRelease>,
    /// Moveable deadline, bounded by `hard_cap`.
    deadline: Mutex<DateTime<Utc>>,
    hard_cap: DateTime<Utc>,
}

type WaitMap = Arc<DashMap<(Uuid, WorkspaceId), Arc<WaitEntry>>>;

/// One signal channel per `(session, waiter)`.
///
/// Release is exactly-once: whoever signals removes the entry from the map
/// before sending, so no later writer can reach the same channel. A waiter
/// that times out removes its own entry, then drains the channel once to
/// lose gracefully against an in-flight signal.
pub struct WaitRegistry {
    entries: WaitMap,
}

/// Held by the blocked request handler.
pub struct WaitHandle {
    key: (Uuid, WorkspaceId),
    rx: flume::Receiver<WaitRelease>,
    entry: Arc<WaitEntry>,
    entries: WaitMap,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Open a wait. An existing wait for the same `(session, waiter)` is
    /// superseded and its holder observes `Cancelled`.
    pub fn register(
        &self,
        session_id: Uuid,
        waiter: WorkspaceId,
        deadline: DateTime<Utc>,
        hard_cap: DateTime<Utc>,
    ) -> WaitHandle {
        let (tx, rx) = flume::bounded(1);
        let entry = Arc::new(WaitEntry {
            tx,
            deadline: Mutex::new(deadline.min(hard_cap)),
            hard_cap,
        });
        let key = (session_id, waiter);
        if let Some(old) = self.entries.insert(key, entry.clone()) {
            let _ = old.tx.try_send(WaitRelease::Cancelled);
        }
        WaitHandle {
            key,
            rx,
            entry,
            entries: self.entries.clone(),
        }
    }

    /// Release every waiter in the session except `sender`. Returns how many
    /// were signalled.
    pub fn signal_except(
        &self,
        session_id: Uuid,
        sender: WorkspaceId,
        release: WaitRelease,
    ) -> usize {
        let keys: Vec<(Uuid, WorkspaceId)> = self
            .entries
            .iter()
            .map(|e| *e.key())
            .filter(|(sid, waiter)| *sid == session_id && *waiter != sender)
            .collect();
        let mut signalled = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                if entry.tx.try_send(release.clone()).is_ok() {
                    signalled += 1;
                }
            }
        }
        signalled
    }

    /// Push a waiter's deadline out, clamped to its hard cap. Returns the
    /// effective deadline, or `None` when there is no active wait.
    pub fn extend(
        &self,
        session_id: Uuid,
        waiter: WorkspaceId,
        new_deadline: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let entry = self.entries.get(&(session_id, waiter))?;
        let clamped = new_deadline.min(entry.hard_cap);
        let mut deadline = entry.deadline.lock().expect("wait deadline lock poisoned");
        if clamped > *deadline {
            *deadline = clamped;
        }
        Some(*deadline)
    }

    /// Does anyone other than `sender` currently wait on this session? Feeds
    /// the `delivered` flag.
    pub fn has_waiters_except(&self, session_id: Uuid, sender: WorkspaceId) -> bool {
        self.entries
            .iter()
            .any(|e| e.key().0 == session_id && e.key().1 != sender)
    }

    /// Tear down one wait (client disconnect).
    pub fn cancel(&self, session_id: Uuid, waiter: WorkspaceId) {
        if let Some((_, entry)) = self.entries.remove(&(session_id, waiter)) {
            let _ = entry.tx.try_send(WaitRelease::Cancelled);
        }
    }

    pub fn clear(&self) {
        let keys: Vec<(Uuid, WorkspaceId)> = self.entries.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let _ = entry.tx.try_send(WaitRelease::Cancelled);
            }
        }
    }
}

impl Default for WaitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitHandle {
    /// Client disconnect cancels the wait: the handler future is dropped,
    /// and the entry must not linger as a signal target. A no-op when the
    /// entry was already consumed or superseded.
    fn drop(&mut self) {
        self.entries
            .remove_if(&self.key, |_, v| Arc::ptr_eq(v, &self.entry));
    }
}

impl WaitHandle {
    /// Block until the wait releases: by signal, by deadline, or by
    /// cancellation. Deadline extensions made while blocked are honoured.
    pub async fn wait(self) -> WaitRelease {
        loop {
            let deadline = *self
                .entry
                .deadline
                .lock()
                .expect("wait deadline lock poisoned");
            let now = Utc::now();
            let remaining = (deadline - now).to_std().unwrap_or_default();

            match tokio::time::timeout(remaining, self.rx.recv_async()).await {
                Ok(Ok(release)) => return release,
                Ok(Err(_)) => return WaitRelease::Cancelled,
                Err(_) => {
                    let current = *self
                        .entry
                        .deadline
                        .lock()
                        .expect("wait deadline lock poisoned");
                    if current > Utc::now() {
                        // Extended while we slept.
                        continue;
                    }
                    // Deadline passed: retire the entry ourselves, but lose
                    // gracefully to a signaller that removed it first.
                    let removed = self
                        .entries
                        .remove_if(&self.key, |_, v| Arc::ptr_eq(v, &self.entry))
                        .is_some();
                    if let Ok(release) = self.rx.try_recv() {
                        return release;
                    }
                    if removed {
                        return WaitRelease::Deadline;
                    }
                    return WaitRelease::Cancelled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(session: Uuid, sender: WorkspaceId) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: session,
            project_id: Uuid::new_v4(),
            sender_workspace_id: sender,
            sender_alias: "bob".into(),
            body: "ok".into(),
            leaving: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reply_releases_waiter() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let handle = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::seconds(30),
            Utc::now() + chrono::Duration::seconds(600),
        );

        let signalled = registry.signal_except(session, bob, WaitRelease::Reply(msg(session, bob)));
        assert_eq!(signalled, 1);

        match handle.wait().await {
            WaitRelease::Reply(m) => assert_eq!(m.body, "ok"),
            other => panic!("expected reply: {other:?}"),
        }
        // Released exactly once; the entry is gone.
        assert!(!registry.has_waiters_except(session, bob));
    }

    #[tokio::test]
    async fn sender_does_not_release_itself() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();

        let _handle = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::seconds(30),
            Utc::now() + chrono::Duration::seconds(600),
        );
        let signalled =
            registry.signal_except(session, alice, WaitRelease::Reply(msg(session, alice)));
        assert_eq!(signalled, 0);
        assert!(registry.has_waiters_except(session, Uuid::new_v4()));
    }

    #[tokio::test]
    async fn deadline_releases_waiter() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();

        let handle = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::milliseconds(20),
            Utc::now() + chrono::Duration::seconds(600),
        );
        match handle.wait().await {
            WaitRelease::Deadline => {}
            other => panic!("expected deadline: {other:?}"),
        }
        assert!(!registry.has_waiters_except(session, Uuid::new_v4()));
    }

    #[tokio::test]
    async fn extend_pushes_deadline_within_cap() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let cap = Utc::now() + chrono::Duration::seconds(2);

        let handle = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::milliseconds(50),
            cap,
        );

        // Ask for far more than the cap allows; it clamps.
        let effective = registry
            .extend(session, alice, Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(effective, cap);

        // Signal shortly after the original (pre-extension) deadline; the
        // waiter must still be blocked.
        let registry2 = registry;
        let bob = Uuid::new_v4();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            registry2.signal_except(session, bob, WaitRelease::Reply(msg(session, bob)));
        });
        match handle.wait().await {
            WaitRelease::Reply(_) => {}
            other => panic!("expected reply after extension: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reregister_cancels_previous_wait() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();

        let first = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::seconds(30),
            Utc::now() + chrono::Duration::seconds(600),
        );
        let _second = registry.register(
            session,
            alice,
            Utc::now() + chrono::Duration::seconds(30),
            Utc::now() + chrono::Duration::seconds(600),
        );
        match first.wait().await {
            WaitRelease::Cancelled => {}
            other => panic!("expected cancelled: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_deadline_returns_immediately() {
        let registry = WaitRegistry::new();
        let session = Uuid::new_v4();
        let alice = Uuid::new_v4();

        let handle = registry.register(
            session,
            alice,
            Utc::now(),
            Utc::now() + chrono::Duration::seconds(600),
        );
        match handle.wait().await {
            WaitRelease::Deadline => {}
            other => panic!("expected deadline: {other:?}"),
        }
    }
}
