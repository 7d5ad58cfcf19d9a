use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use uuid::Uuid;

use bh_core::types::{OutboxEntry, OutboxStatus, EVENT_STATUS_CHANGE};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::issues::StatusChange;
use crate::projects::{parse_uuid, parse_uuid_opt};

pub(crate) const OUTBOX_COLS: &str =
    "id, project_id, recipient_workspace_id, recipient_alias, event_type, payload,
     fingerprint, attempts, last_error, status, created_at, updated_at,
     next_attempt_at, processed_at, delivered_message_id";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        recipient_workspace_id: parse_uuid(row, 2)?,
        recipient_alias: row.get(3)?,
        event_type: row.get(4)?,
        payload: db::from_json(&row.get::<_, String>(5)?)?,
        fingerprint: row.get(6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        status: parse_status(&row.get::<_, String>(9)?),
        created_at: db::parse_ts(&row.get::<_, String>(10)?)?,
        updated_at: db::parse_ts(&row.get::<_, String>(11)?)?,
        next_attempt_at: db::parse_ts(&row.get::<_, String>(12)?)?,
        processed_at: db::parse_ts_opt(row.get(13)?)?,
        delivered_message_id: parse_uuid_opt(row, 14)?,
    })
}

fn parse_status(raw: &str) -> OutboxStatus {
    match raw {
        "processing" => OutboxStatus::Processing,
        "completed" => OutboxStatus::Completed,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

/// Content fingerprint for a status transition: SHA-256 over the identifying
/// tuple, truncated to 32 hex chars. Dispatcher retries and recipient-side
/// dedupe both key on this.
pub(crate) fn fingerprint(
    bead_id: &str,
    old_status: &str,
    new_status: &str,
    ts: DateTime<Utc>,
) -> String {
    let input = format!("{bead_id}\x1f{old_status}\x1f{new_status}\x1f{}", db::ts(ts));
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_bytes());
    let hex: String = digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    hex[..32].to_string()
}

/// Insert one outbox row per subscription matching `(project, bead)` and, when
/// the subscription is repo-scoped, the syncing repo. Runs inside the sync
/// transaction so the notification commits with the status change.
pub(crate) fn enqueue_status_change_tx(
    tx: &Transaction<'_>,
    project_id: &str,
    sync_repo: Option<&str>,
    change: &StatusChange,
) -> rusqlite::Result<u64> {
    let subscribers: Vec<(String, String, Option<String>, String)> = {
        let mut stmt = tx.prepare(
            "SELECT s.workspace_id, w.alias, s.repo, s.event_types
             FROM domain_subscriptions s
             JOIN domain_workspaces w ON w.id = s.workspace_id
             WHERE s.project_id = ?1 AND s.bead_id = ?2 AND w.deleted_at IS NULL",
        )?;
        let rows = stmt.query_map(params![project_id, change.bead_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let now = db::ts(Utc::now());
    let mut queued = 0;
    for (workspace_id, alias, sub_repo, event_types_raw) in subscribers {
        if let Some(sub_repo) = &sub_repo {
            if sync_repo != Some(sub_repo.as_str()) {
                continue;
            }
        }
        let event_types: Vec<String> =
            serde_json::from_str(&event_types_raw).unwrap_or_default();
        if !event_types.iter().any(|t| t == EVENT_STATUS_CHANGE) {
            continue;
        }

        let payload = serde_json::json!({
            "bead_id": change.bead_id,
            "old_status": change.old_status,
            "new_status": change.new_status,
            "fingerprint": change.fingerprint,
        });
        tx.execute(
            "INSERT INTO domain_notification_outbox
                 (id, project_id, recipient_workspace_id, recipient_alias, event_type,
                  payload, fingerprint, status, created_at, updated_at, next_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8, ?8)",
            params![
                Uuid::new_v4().to_string(),
                project_id,
                workspace_id,
                alias,
                EVENT_STATUS_CHANGE,
                payload.to_string(),
                change.fingerprint,
                now
            ],
        )?;
        queued += 1;
    }
    Ok(queued)
}

impl Db {
    /// Enqueue one notification outside the sync path (retry tooling,
    /// tests, future event sources). Entries land `pending` and due now.
    pub async fn outbox_enqueue(
        &self,
        project_id: Uuid,
        recipient_workspace_id: Uuid,
        recipient_alias: String,
        event_type: String,
        payload: serde_json::Value,
        fingerprint: String,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.call(move |conn| {
            let now = db::ts(Utc::now());
            conn.execute(
                "INSERT INTO domain_notification_outbox
                     (id, project_id, recipient_workspace_id, recipient_alias, event_type,
                      payload, fingerprint, status, created_at, updated_at, next_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8, ?8)",
                params![
                    id.to_string(),
                    project_id.to_string(),
                    recipient_workspace_id.to_string(),
                    recipient_alias,
                    event_type,
                    payload.to_string(),
                    fingerprint,
                    now
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    /// Claim up to `batch` due entries by flipping them to `processing`
    /// inside one transaction. The single SQLite writer gives the same
    /// no-double-claim guarantee as `FOR UPDATE SKIP LOCKED`.
    pub async fn outbox_claim_batch(
        &self,
        batch: u32,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now_s = db::ts(now);
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM domain_notification_outbox
                     WHERE status IN ('pending', 'failed') AND attempts < ?1
                       AND next_attempt_at <= ?2
                     ORDER BY created_at
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![max_attempts, now_s, batch], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut claimed = Vec::with_capacity(ids.len());
            for id in ids {
                tx.execute(
                    "UPDATE domain_notification_outbox
                     SET status = 'processing', updated_at = ?2
                     WHERE id = ?1",
                    params![id, now_s],
                )?;
                claimed.push(tx.query_row(
                    &format!("SELECT {OUTBOX_COLS} FROM domain_notification_outbox WHERE id = ?1"),
                    params![id],
                    row_to_entry,
                )?);
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    pub async fn outbox_mark_completed(
        &self,
        id: Uuid,
        delivered_message_id: Uuid,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            let now = db::ts(Utc::now());
            conn.execute(
                "UPDATE domain_notification_outbox
                 SET status = 'completed', processed_at = ?2, updated_at = ?2,
                     delivered_message_id = ?3
                 WHERE id = ?1",
                params![id.to_string(), now, delivered_message_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Record a failed attempt. Below `max_attempts` the entry goes back to
    /// `pending` with its next attempt pushed out; at the cap it is failed
    /// permanently.
    pub async fn outbox_mark_failed(
        &self,
        id: Uuid,
        error: String,
        max_attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            let now = db::ts(Utc::now());
            conn.execute(
                "UPDATE domain_notification_outbox
                 SET attempts = attempts + 1,
                     last_error = ?2,
                     status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END,
                     next_attempt_at = ?4,
                     updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    error,
                    max_attempts,
                    db::ts(next_attempt_at),
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// True when a completed delivery already exists for this recipient and
    /// fingerprint: the dispatcher's dedupe window.
    pub async fn outbox_already_delivered(
        &self,
        recipient: Uuid,
        fingerprint: String,
        exclude_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM domain_notification_outbox
                 WHERE recipient_workspace_id = ?1 AND fingerprint = ?2
                   AND status = 'completed' AND id != ?3",
                params![recipient.to_string(), fingerprint, exclude_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
        .await
    }

    /// Pending + processing depth, surfaced by the status snapshot.
    pub async fn outbox_depth(&self, project_id: Uuid) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM domain_notification_outbox
                 WHERE project_id = ?1 AND status IN ('pending', 'processing')",
                params![project_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn outbox_entry(&self, id: Uuid) -> Result<Option<OutboxEntry>, StoreError> {
        use rusqlite::OptionalExtension;
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {OUTBOX_COLS} FROM domain_notification_outbox WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_entry,
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_pending(db: &Db, project: Uuid, recipient: Uuid, fp: &str) -> Uuid {
        let id = Uuid::new_v4();
        let fp = fp.to_string();
        db.call({
            let id = id;
            let fp = fp.clone();
            move |conn| {
                let now = db::ts(Utc::now());
                conn.execute(
                    "INSERT INTO domain_notification_outbox
                         (id, project_id, recipient_workspace_id, recipient_alias, event_type,
                          payload, fingerprint, status, created_at, updated_at, next_attempt_at)
                     VALUES (?1, ?2, ?3, 'charlie', 'status_change', '{}', ?4, 'pending', ?5, ?5, ?5)",
                    params![id.to_string(), project.to_string(), recipient.to_string(), fp, now],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn claim_batch_flips_to_processing() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let id = insert_pending(&db, project, recipient, "fp-1").await;

        let claimed = db.outbox_claim_batch(10, 5, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);

        // Already processing, not claimed again.
        let again = db.outbox_claim_batch(10, 5, Utc::now()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn failure_backs_off_then_fails_permanently() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let id = insert_pending(&db, project, recipient, "fp-1").await;
        db.outbox_claim_batch(10, 2, Utc::now()).await.unwrap();

        db.outbox_mark_failed(id, "boom".into(), 2, Utc::now())
            .await
            .unwrap();
        let entry = db.outbox_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("boom"));

        db.outbox_claim_batch(10, 2, Utc::now()).await.unwrap();
        db.outbox_mark_failed(id, "boom again".into(), 2, Utc::now())
            .await
            .unwrap();
        let entry = db.outbox_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Failed);

        // Permanently failed entries are never claimed again.
        let claimed = db.outbox_claim_batch(10, 2, Utc::now()).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn dedupe_detects_completed_duplicates() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let first = insert_pending(&db, project, recipient, "fp-1").await;
        let second = insert_pending(&db, project, recipient, "fp-1").await;

        db.outbox_mark_completed(first, Uuid::new_v4()).await.unwrap();
        assert!(db
            .outbox_already_delivered(recipient, "fp-1".into(), second)
            .await
            .unwrap());
        assert!(!db
            .outbox_already_delivered(recipient, "fp-other".into(), second)
            .await
            .unwrap());
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let ts = Utc::now();
        let a = fingerprint("bd-1", "open", "in_progress", ts);
        let b = fingerprint("bd-1", "open", "in_progress", ts);
        let c = fingerprint("bd-1", "open", "closed", ts);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
