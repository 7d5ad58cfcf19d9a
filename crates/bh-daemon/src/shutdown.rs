use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal — cooperative shutdown coordination
// ---------------------------------------------------------------------------

/// Broadcast-based shutdown coordinator.
///
/// Components register interest by calling `subscribe()`, then `select!` on
/// the returned receiver alongside their main loop. `trigger()` flips the
/// flag and broadcasts; `wait_for_drain` blocks until the expected number of
/// components confirm, or the drain timeout passes.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    trigger: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    drain_tx: Arc<watch::Sender<usize>>,
    drain_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        let (drain_tx, drain_rx) = watch::channel(0);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
            drain_tx: Arc::new(drain_tx),
            drain_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown signal triggered");
            let _ = self.trigger.send(());
        } else {
            warn!("shutdown already triggered");
        }
    }

    /// Notify that a component has finished draining.
    pub fn confirm_drained(&self) {
        self.drain_tx.send_modify(|count| *count += 1);
    }

    /// Wait for `expected` components to confirm drain, with a timeout.
    pub async fn wait_for_drain(&mut self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = *self.drain_rx.borrow();
            if current >= expected {
                info!(count = current, "all components drained");
                return true;
            }
            match tokio::time::timeout_at(deadline, self.drain_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return true,
                Err(_) => {
                    warn!(
                        current,
                        expected, "drain timeout — some components did not confirm"
                    );
                    return false;
                }
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutting_down());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_shutting_down());
    }

    #[tokio::test]
    async fn subscribe_receives_trigger() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        signal.trigger();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn drain_completes_when_all_confirm() {
        let mut signal = ShutdownSignal::new();
        signal.trigger();
        let confirmer = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            confirmer.confirm_drained();
            confirmer.confirm_drained();
        });
        assert!(signal.wait_for_drain(2, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_times_out_without_confirmations() {
        let mut signal = ShutdownSignal::new();
        signal.trigger();
        assert!(!signal.wait_for_drain(1, Duration::from_millis(50)).await);
    }
}
