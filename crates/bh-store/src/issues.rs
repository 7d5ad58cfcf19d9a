use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use bh_core::types::{BeadRef, Issue};

use crate::claims::{self, ClaimReconcile};
use crate::db::{self, Db};
use crate::error::StoreError;
use crate::outbox;
use crate::projects::parse_uuid;

pub(crate) const ISSUE_COLS: &str =
    "project_id, bead_id, title, body, status, priority, assignee, creator,
     labels, parent, blocked_by, created_at, updated_at";

pub(crate) fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        project_id: parse_uuid(row, 0)?,
        bead_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        assignee: row.get(6)?,
        creator: row.get(7)?,
        labels: db::from_json(&row.get::<_, String>(8)?)?,
        parent: db::from_json_opt::<BeadRef>(row.get(9)?)?,
        blocked_by: db::from_json(&row.get::<_, String>(10)?)?,
        created_at: db::parse_ts(&row.get::<_, String>(11)?)?,
        updated_at: db::parse_ts(&row.get::<_, String>(12)?)?,
    })
}

// ---------------------------------------------------------------------------
// Sync apply
// ---------------------------------------------------------------------------

/// One validated issue record from a client push, ready to store.
#[derive(Debug, Clone)]
pub struct IssueUpsert {
    pub bead_id: String,
    pub title: String,
    pub body: Option<String>,
    pub status: String,
    pub priority: i64,
    pub assignee: Option<String>,
    pub creator: Option<String>,
    pub labels: Vec<String>,
    pub parent: Option<BeadRef>,
    pub blocked_by: Vec<BeadRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A detected status transition, reported back to the caller for event
/// publication after commit.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub bead_id: String,
    pub old_status: String,
    pub new_status: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct SyncApply {
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub workspace_alias: String,
    pub workspace_human_name: Option<String>,
    /// Canonical origin of the pushing workspace's repo, for repo-scoped
    /// subscription matching.
    pub repo: Option<String>,
    pub upserts: Vec<IssueUpsert>,
    pub deleted_ids: Vec<String>,
    pub claims_snapshot: Option<ClaimReconcile>,
}

#[derive(Debug, Default)]
pub struct SyncApplyResult {
    pub upserts: u64,
    pub deletes: u64,
    pub status_changes: Vec<StatusChange>,
    pub notifications_queued: u64,
    pub claims_added: Vec<String>,
    pub claims_removed: Vec<String>,
}

/// Result of a single upsert inside the transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated { previous_status: String },
}

fn upsert_issue_tx(
    tx: &Transaction<'_>,
    project_id: &str,
    rec: &IssueUpsert,
) -> rusqlite::Result<UpsertOutcome> {
    let previous: Option<String> = tx
        .query_row(
            "SELECT status FROM issues_beads WHERE project_id = ?1 AND bead_id = ?2",
            params![project_id, rec.bead_id],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO issues_beads
             (project_id, bead_id, title, body, status, priority, assignee, creator,
              labels, parent, blocked_by, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
         ON CONFLICT(project_id, bead_id) DO UPDATE SET
             title=excluded.title, body=excluded.body, status=excluded.status,
             priority=excluded.priority, assignee=excluded.assignee,
             creator=excluded.creator, labels=excluded.labels,
             parent=excluded.parent, blocked_by=excluded.blocked_by,
             updated_at=excluded.updated_at",
        params![
            project_id,
            rec.bead_id,
            rec.title,
            rec.body,
            rec.status,
            rec.priority,
            rec.assignee,
            rec.creator,
            db::to_json(&rec.labels),
            rec.parent.as_ref().map(db::to_json),
            db::to_json(&rec.blocked_by),
            db::ts(rec.created_at),
            db::ts(rec.updated_at),
        ],
    )?;

    Ok(match previous {
        None => UpsertOutcome::Inserted,
        Some(previous_status) => UpsertOutcome::Updated { previous_status },
    })
}

impl Db {
    /// Apply one client push as a single transaction: issue upserts with
    /// previous-status capture, hard deletes, claim reconciliation, and one
    /// outbox row per matching subscription for every detected transition.
    ///
    /// Per-workspace serialisation is the caller's job; within the database
    /// the single writer already orders commits.
    pub async fn sync_apply(&self, input: SyncApply) -> Result<SyncApplyResult, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = input.project_id.to_string();
            let mut result = SyncApplyResult::default();

            for rec in &input.upserts {
                match upsert_issue_tx(&tx, &pid, rec)? {
                    UpsertOutcome::Inserted => {
                        result.upserts += 1;
                    }
                    UpsertOutcome::Updated { previous_status } => {
                        result.upserts += 1;
                        if previous_status != rec.status {
                            let fingerprint = outbox::fingerprint(
                                &rec.bead_id,
                                &previous_status,
                                &rec.status,
                                rec.updated_at,
                            );
                            result.status_changes.push(StatusChange {
                                bead_id: rec.bead_id.clone(),
                                old_status: previous_status,
                                new_status: rec.status.clone(),
                                fingerprint,
                            });
                        }
                    }
                }
            }

            for bead_id in &input.deleted_ids {
                result.deletes += tx.execute(
                    "DELETE FROM issues_beads WHERE project_id = ?1 AND bead_id = ?2",
                    params![pid, bead_id],
                )? as u64;
            }

            if let Some(snapshot) = &input.claims_snapshot {
                let (added, removed) = claims::reconcile_tx(
                    &tx,
                    &pid,
                    &input.workspace_id.to_string(),
                    &input.workspace_alias,
                    input.workspace_human_name.as_deref(),
                    snapshot,
                )?;
                result.claims_added = added;
                result.claims_removed = removed;
            }

            for change in &result.status_changes {
                result.notifications_queued += outbox::enqueue_status_change_tx(
                    &tx,
                    &pid,
                    input.repo.as_deref(),
                    change,
                )?;
            }

            crate::audit::append_tx(
                &tx,
                &pid,
                Some(&input.workspace_id.to_string()),
                "bdh.sync",
                &serde_json::json!({
                    "upserts": result.upserts,
                    "deletes": result.deletes,
                    "status_changes": result.status_changes.len(),
                }),
            )?;

            tx.commit()?;
            Ok(result)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn issue_by_id(
        &self,
        project_id: Uuid,
        bead_id: String,
    ) -> Result<Option<Issue>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {ISSUE_COLS} FROM issues_beads
                         WHERE project_id = ?1 AND bead_id = ?2"
                    ),
                    params![project_id.to_string(), bead_id],
                    row_to_issue,
                )
                .optional()?)
        })
        .await
    }

    pub async fn list_issues(
        &self,
        project_id: Uuid,
        filter: IssueFilter,
        after: Option<String>,
        limit: u32,
    ) -> Result<IssuePage, StoreError> {
        self.call(move |conn| {
            let pid = project_id.to_string();
            let mut sql = format!(
                "SELECT {ISSUE_COLS} FROM issues_beads WHERE project_id = ?1"
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql + Send>> = vec![Box::new(pid)];

            if let Some(status) = &filter.status {
                args.push(Box::new(status.clone()));
                sql.push_str(&format!(" AND status = ?{}", args.len()));
            }
            if let Some(assignee) = &filter.assignee {
                args.push(Box::new(assignee.clone()));
                sql.push_str(&format!(" AND assignee = ?{}", args.len()));
            }
            if let Some(label) = &filter.label {
                args.push(Box::new(format!("%{}%", db::to_json(&label))));
                sql.push_str(&format!(" AND labels LIKE ?{}", args.len()));
            }
            if let Some(q) = &filter.q {
                let needle = format!("%{q}%");
                args.push(Box::new(needle.clone()));
                sql.push_str(&format!(" AND (title LIKE ?{}", args.len()));
                args.push(Box::new(needle));
                sql.push_str(&format!(" OR body LIKE ?{})", args.len()));
            }
            if let Some(after) = &after {
                args.push(Box::new(after.clone()));
                sql.push_str(&format!(" AND bead_id > ?{}", args.len()));
            }
            sql.push_str(&format!(" ORDER BY bead_id LIMIT {}", limit as i64 + 1));

            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> =
                args.iter().map(|b| b.as_ref() as &dyn rusqlite::ToSql).collect();
            let mut items = stmt
                .query_map(params_ref.as_slice(), row_to_issue)?
                .collect::<Result<Vec<_>, _>>()?;

            let next_after = if items.len() as u32 > limit {
                items.truncate(limit as usize);
                items.last().map(|i| i.bead_id.clone())
            } else {
                None
            };
            Ok(IssuePage { items, next_after })
        })
        .await
    }

    /// Minimal rows for the ready computation: every issue's status and
    /// blockers.
    pub async fn issues_for_ready(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<(String, String, Vec<BeadRef>)>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT bead_id, status, blocked_by FROM issues_beads WHERE project_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![project_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        db::from_json::<Vec<BeadRef>>(&row.get::<_, String>(2)?)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug)]
pub struct IssuePage {
    pub items: Vec<Issue>,
    /// `bead_id` to pass back as `after` for the next page.
    pub next_after: Option<String>,
}
