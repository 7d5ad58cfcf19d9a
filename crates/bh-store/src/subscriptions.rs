use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::Subscription;

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::parse_uuid;

const SUB_COLS: &str = "id, project_id, workspace_id, bead_id, repo, event_types, created_at";

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        workspace_id: parse_uuid(row, 2)?,
        bead_id: row.get(3)?,
        repo: row.get(4)?,
        event_types: db::from_json(&row.get::<_, String>(5)?)?,
        created_at: db::parse_ts(&row.get::<_, String>(6)?)?,
    })
}

/// Outcome of a create; the tuple is unique per spec.
#[derive(Debug)]
pub enum SubscribeOutcome {
    Created(Subscription),
    Duplicate(Subscription),
}

impl Db {
    pub async fn create_subscription(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
        bead_id: String,
        repo: Option<String>,
        event_types: Vec<String>,
    ) -> Result<SubscribeOutcome, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();
            let wid = workspace_id.to_string();
            let repo_key = repo.clone().unwrap_or_default();

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {SUB_COLS} FROM domain_subscriptions
                         WHERE project_id = ?1 AND workspace_id = ?2 AND bead_id = ?3
                           AND COALESCE(repo, '') = ?4"
                    ),
                    params![pid, wid, bead_id, repo_key],
                    row_to_subscription,
                )
                .optional()?;
            if let Some(existing) = existing {
                return Ok(SubscribeOutcome::Duplicate(existing));
            }

            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO domain_subscriptions
                     (id, project_id, workspace_id, bead_id, repo, event_types, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    id,
                    pid,
                    wid,
                    bead_id,
                    repo,
                    db::to_json(&event_types),
                    db::ts(Utc::now())
                ],
            )?;
            let created = tx.query_row(
                &format!("SELECT {SUB_COLS} FROM domain_subscriptions WHERE id = ?1"),
                params![id],
                row_to_subscription,
            )?;
            tx.commit()?;
            Ok(SubscribeOutcome::Created(created))
        })
        .await
    }

    /// Delete scoped to the owning workspace; returns whether a row existed.
    pub async fn delete_subscription(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM domain_subscriptions
                 WHERE id = ?1 AND project_id = ?2 AND workspace_id = ?3",
                params![
                    id.to_string(),
                    project_id.to_string(),
                    workspace_id.to_string()
                ],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn subscriptions_for_workspace(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUB_COLS} FROM domain_subscriptions
                 WHERE project_id = ?1 AND workspace_id = ?2
                 ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map(
                    params![project_id.to_string(), workspace_id.to_string()],
                    row_to_subscription,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
