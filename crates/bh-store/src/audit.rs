use chrono::Utc;
use rusqlite::{params, Transaction};
use uuid::Uuid;

use bh_core::types::AuditEntry;

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::{parse_uuid, parse_uuid_opt};

const AUDIT_COLS: &str = "id, project_id, actor_workspace_id, action, payload, created_at";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        actor_workspace_id: parse_uuid_opt(row, 2)?,
        action: row.get(3)?,
        payload: db::from_json(&row.get::<_, String>(4)?)?,
        created_at: db::parse_ts(&row.get::<_, String>(5)?)?,
    })
}

/// Append an audit row inside an open transaction so the record commits with
/// the mutation it describes.
pub(crate) fn append_tx(
    tx: &Transaction<'_>,
    project_id: &str,
    actor_workspace_id: Option<&str>,
    action: &str,
    payload: &serde_json::Value,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO domain_audit_log (id, project_id, actor_workspace_id, action, payload, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            Uuid::new_v4().to_string(),
            project_id,
            actor_workspace_id,
            action,
            payload.to_string(),
            db::ts(Utc::now())
        ],
    )?;
    Ok(())
}

impl Db {
    /// Standalone append for mutations that do not otherwise open a
    /// transaction.
    pub async fn audit_append(
        &self,
        project_id: Uuid,
        actor_workspace_id: Option<Uuid>,
        action: String,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            append_tx(
                &tx,
                &project_id.to_string(),
                actor_workspace_id.map(|id| id.to_string()).as_deref(),
                &action,
                &payload,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn audit_list(
        &self,
        project_id: Uuid,
        after: Option<String>,
        limit: u32,
    ) -> Result<(Vec<AuditEntry>, Option<String>), StoreError> {
        self.call(move |conn| {
            let pid = project_id.to_string();
            let mut items = match &after {
                Some(after) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {AUDIT_COLS} FROM domain_audit_log
                         WHERE project_id = ?1 AND created_at || id > ?2
                         ORDER BY created_at, id LIMIT ?3"
                    ))?;
                    let rows = stmt.query_map(params![pid, after, limit as i64 + 1], row_to_entry)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {AUDIT_COLS} FROM domain_audit_log
                         WHERE project_id = ?1
                         ORDER BY created_at, id LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(params![pid, limit as i64 + 1], row_to_entry)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };

            let next = if items.len() as u32 > limit {
                items.truncate(limit as usize);
                items
                    .last()
                    .map(|e| format!("{}{}", db::ts(e.created_at), e.id))
            } else {
                None
            };
            Ok((items, next))
        })
        .await
    }
}
