use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use bh_core::types::MailPriority;
use bh_store::Db;

use crate::mail::MailPlane;
use crate::render;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch_size: u32,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_cap: Duration,
    /// Idle sleep between drain passes.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Background worker draining the notification outbox into mail.
///
/// At-least-once: a crash between delivery and `completed` re-delivers on
/// the next pass; recipients dedupe on the fingerprint embedded in the body.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Db,
    mail: MailPlane,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(db: Db, mail: MailPlane, config: DispatcherConfig) -> Self {
        Self { db, mail, config }
    }

    /// Run until the shutdown signal fires, finishing the in-flight batch.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "notification dispatcher started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("notification dispatcher draining");
                    // One last pass so claimed entries are not stranded in
                    // `processing`.
                    let _ = self.drain_once().await;
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.drain_once().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(delivered = n, "outbox drained"),
                        Err(e) => tracing::warn!(error = %e, "outbox drain failed"),
                    }
                }
            }
        }
    }

    /// One drain pass. Returns how many entries completed.
    pub async fn drain_once(&self) -> Result<u64, bh_core::Error> {
        let batch = self
            .db
            .outbox_claim_batch(self.config.batch_size, self.config.max_attempts, Utc::now())
            .await?;
        let mut completed = 0;
        for entry in batch {
            // Dedup window: if a completed delivery already exists for this
            // recipient and fingerprint, finish the entry without mailing.
            let duplicate = self
                .db
                .outbox_already_delivered(
                    entry.recipient_workspace_id,
                    entry.fingerprint.clone(),
                    entry.id,
                )
                .await?;
            if duplicate {
                self.db
                    .outbox_mark_completed(entry.id, Uuid::nil())
                    .await?;
                completed += 1;
                continue;
            }

            let (subject, body) = render::render(&entry);
            let project_slug = self
                .db
                .project_by_id(entry.project_id)
                .await?
                .map(|p| p.slug)
                .unwrap_or_default();

            match self
                .mail
                .send_system(
                    entry.project_id,
                    &project_slug,
                    entry.recipient_workspace_id,
                    subject,
                    body,
                    MailPriority::Normal,
                )
                .await
            {
                Ok(mail) => {
                    self.db.outbox_mark_completed(entry.id, mail.id).await?;
                    completed += 1;
                }
                Err(e) => {
                    let backoff = self.backoff_for(entry.attempts);
                    tracing::warn!(
                        outbox_id = %entry.id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "notification delivery failed"
                    );
                    self.db
                        .outbox_mark_failed(
                            entry.id,
                            e.to_string(),
                            self.config.max_attempts,
                            Utc::now()
                                + chrono::Duration::from_std(backoff)
                                    .unwrap_or(chrono::Duration::seconds(300)),
                        )
                        .await?;
                }
            }
        }
        Ok(completed)
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        backoff(&self.config, attempts)
    }
}

/// `min(base * 2^attempts, cap)`.
fn backoff(config: &DispatcherConfig, attempts: u32) -> Duration {
    let exp = config
        .base_backoff
        .saturating_mul(2u32.saturating_pow(attempts.min(31)));
    exp.min(config.backoff_cap)
}
