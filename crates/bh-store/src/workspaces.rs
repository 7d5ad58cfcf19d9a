use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::{BeadRef, Workspace, WorkspaceKind};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::{parse_uuid, parse_uuid_opt};

pub(crate) const WORKSPACE_COLS: &str =
    "id, project_id, repo_id, kind, alias, human_name, role, current_branch, focus,
     host, path, timezone, created_at, updated_at, deleted_at, last_seen_at";

pub(crate) fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        repo_id: parse_uuid_opt(row, 2)?,
        kind: match row.get::<_, String>(3)?.as_str() {
            "dashboard" => WorkspaceKind::Dashboard,
            _ => WorkspaceKind::Agent,
        },
        alias: row.get(4)?,
        human_name: row.get(5)?,
        role: row.get(6)?,
        current_branch: row.get(7)?,
        focus: db::from_json_opt::<BeadRef>(row.get(8)?)?,
        host: row.get(9)?,
        path: row.get(10)?,
        timezone: row.get(11)?,
        created_at: db::parse_ts(&row.get::<_, String>(12)?)?,
        updated_at: db::parse_ts(&row.get::<_, String>(13)?)?,
        deleted_at: db::parse_ts_opt(row.get(14)?)?,
        last_seen_at: db::parse_ts_opt(row.get(15)?)?,
    })
}

/// Mutable workspace fields. `None` leaves a field untouched; `Some(None)`
/// clears it. Alias, project, repo, and kind are not here on purpose.
#[derive(Debug, Clone, Default)]
pub struct WorkspacePatch {
    pub human_name: Option<Option<String>>,
    pub role: Option<Option<String>>,
    pub current_branch: Option<Option<String>>,
    pub focus: Option<Option<BeadRef>>,
    pub host: Option<Option<String>>,
    pub path: Option<Option<String>>,
    pub timezone: Option<Option<String>>,
}

impl WorkspacePatch {
    pub fn is_empty(&self) -> bool {
        self.human_name.is_none()
            && self.role.is_none()
            && self.current_branch.is_none()
            && self.focus.is_none()
            && self.host.is_none()
            && self.path.is_none()
            && self.timezone.is_none()
    }
}

impl Db {
    pub async fn workspace_by_id(&self, id: Uuid) -> Result<Option<Workspace>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {WORKSPACE_COLS} FROM domain_workspaces WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_workspace,
                )
                .optional()?)
        })
        .await
    }

    pub async fn workspaces_for_project(
        &self,
        project_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Workspace>, StoreError> {
        self.call(move |conn| {
            let sql = if include_deleted {
                format!(
                    "SELECT {WORKSPACE_COLS} FROM domain_workspaces
                     WHERE project_id = ?1 ORDER BY alias"
                )
            } else {
                format!(
                    "SELECT {WORKSPACE_COLS} FROM domain_workspaces
                     WHERE project_id = ?1 AND deleted_at IS NULL ORDER BY alias"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![project_id.to_string()], row_to_workspace)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Apply a patch; returns the updated row, or `None` when the workspace
    /// does not exist or is soft-deleted.
    pub async fn update_workspace(
        &self,
        id: Uuid,
        patch: WorkspacePatch,
    ) -> Result<Option<Workspace>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let id_str = id.to_string();
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {WORKSPACE_COLS} FROM domain_workspaces
                         WHERE id = ?1 AND deleted_at IS NULL"
                    ),
                    params![id_str],
                    row_to_workspace,
                )
                .optional()?;
            let Some(existing) = existing else {
                return Ok(None);
            };

            let human_name = patch.human_name.unwrap_or(existing.human_name);
            let role = patch.role.unwrap_or(existing.role);
            let current_branch = patch.current_branch.unwrap_or(existing.current_branch);
            let focus = patch.focus.unwrap_or(existing.focus);
            let host = patch.host.unwrap_or(existing.host);
            let path = patch.path.unwrap_or(existing.path);
            let timezone = patch.timezone.unwrap_or(existing.timezone);
            let now = db::ts(Utc::now());

            tx.execute(
                "UPDATE domain_workspaces SET
                     human_name = ?2, role = ?3, current_branch = ?4, focus = ?5,
                     host = ?6, path = ?7, timezone = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    id_str,
                    human_name,
                    role,
                    current_branch,
                    focus.as_ref().map(db::to_json),
                    host,
                    path,
                    timezone,
                    now
                ],
            )?;

            let updated = tx.query_row(
                &format!("SELECT {WORKSPACE_COLS} FROM domain_workspaces WHERE id = ?1"),
                params![id_str],
                row_to_workspace,
            )?;
            tx.commit()?;
            Ok(Some(updated))
        })
        .await
    }

    /// Soft-delete. Claims held by the workspace are released in the same
    /// transaction; the alias becomes reusable while the row stays deleted.
    pub async fn soft_delete_workspace(&self, id: Uuid) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let id_str = id.to_string();
            let now = db::ts(Utc::now());
            let n = tx.execute(
                "UPDATE domain_workspaces SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, id_str],
            )?;
            if n > 0 {
                tx.execute(
                    "DELETE FROM domain_bead_claims WHERE workspace_id = ?1",
                    params![id_str],
                )?;
            }
            tx.commit()?;
            Ok(n > 0)
        })
        .await
    }

    /// Restore preserves the original bindings. Fails with a constraint error
    /// when the alias was taken by another active workspace in the meantime.
    pub async fn restore_workspace(&self, id: Uuid) -> Result<Option<Workspace>, StoreError> {
        let result = self
            .call(move |conn| {
                let id_str = id.to_string();
                let now = db::ts(Utc::now());
                let n = conn.execute(
                    "UPDATE domain_workspaces SET deleted_at = NULL, updated_at = ?1
                     WHERE id = ?2 AND deleted_at IS NOT NULL",
                    params![now, id_str],
                )?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(conn
                    .query_row(
                        &format!("SELECT {WORKSPACE_COLS} FROM domain_workspaces WHERE id = ?1"),
                        params![id_str],
                        row_to_workspace,
                    )
                    .optional()?)
            })
            .await;
        result
    }

    /// Refresh `last_seen_at`, called on every authenticated write.
    pub async fn touch_last_seen(
        &self,
        id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE domain_workspaces SET last_seen_at = ?1 WHERE id = ?2",
                params![db::ts(seen_at), id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// `(workspace_id, last_seen_at)` pairs for rebuilding presence after an
    /// ephemeral-store wipe.
    pub async fn last_seen_snapshot(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<(Uuid, Option<DateTime<Utc>>)>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, last_seen_at FROM domain_workspaces
                 WHERE project_id = ?1 AND deleted_at IS NULL",
            )?;
            let rows = stmt
                .query_map(params![project_id.to_string()], |row| {
                    Ok((parse_uuid(row, 0)?, db::parse_ts_opt(row.get(1)?)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
