use chrono::Utc;
use rusqlite::{params, Transaction};
use uuid::Uuid;

use bh_core::types::{BeadRef, Claim};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::parse_uuid;

pub(crate) const CLAIM_COLS: &str =
    "project_id, bead_id, workspace_id, alias, human_name, apex, claimed_at";

pub(crate) fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        project_id: parse_uuid(row, 0)?,
        bead_id: row.get(1)?,
        workspace_id: parse_uuid(row, 2)?,
        alias: row.get(3)?,
        human_name: row.get(4)?,
        apex: db::from_json_opt::<BeadRef>(row.get(5)?)?,
        claimed_at: db::parse_ts(&row.get::<_, String>(6)?)?,
    })
}

/// The caller's full claim set, replacing whatever the server holds for that
/// workspace (spec: the snapshot is the current state).
#[derive(Debug, Clone)]
pub struct ClaimReconcile {
    pub entries: Vec<ClaimSnapshotEntry>,
}

#[derive(Debug, Clone)]
pub struct ClaimSnapshotEntry {
    pub bead_id: String,
    pub apex: Option<BeadRef>,
}

/// Reconcile claims for one workspace inside an open transaction. Returns
/// `(added, removed)` bead ids.
pub(crate) fn reconcile_tx(
    tx: &Transaction<'_>,
    project_id: &str,
    workspace_id: &str,
    alias: &str,
    human_name: Option<&str>,
    snapshot: &ClaimReconcile,
) -> rusqlite::Result<(Vec<String>, Vec<String>)> {
    let mut existing: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT bead_id FROM domain_bead_claims
             WHERE project_id = ?1 AND workspace_id = ?2",
        )?;
        let rows = stmt.query_map(params![project_id, workspace_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    existing.sort();

    let wanted: Vec<&ClaimSnapshotEntry> = snapshot.entries.iter().collect();
    let now = db::ts(Utc::now());

    let mut added = Vec::new();
    for entry in &wanted {
        if !existing.contains(&entry.bead_id) {
            tx.execute(
                "INSERT INTO domain_bead_claims
                     (project_id, bead_id, workspace_id, alias, human_name, apex, claimed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(project_id, bead_id, workspace_id) DO NOTHING",
                params![
                    project_id,
                    entry.bead_id,
                    workspace_id,
                    alias,
                    human_name,
                    entry.apex.as_ref().map(db::to_json),
                    now
                ],
            )?;
            added.push(entry.bead_id.clone());
        }
    }

    let mut removed = Vec::new();
    for bead_id in existing {
        if !wanted.iter().any(|e| e.bead_id == bead_id) {
            tx.execute(
                "DELETE FROM domain_bead_claims
                 WHERE project_id = ?1 AND workspace_id = ?2 AND bead_id = ?3",
                params![project_id, workspace_id, bead_id],
            )?;
            removed.push(bead_id);
        }
    }

    Ok((added, removed))
}

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(Claim),
    /// Held by someone else and the caller did not opt into jump-in. Carries
    /// the current claimants for the structured rejection.
    Held(Vec<Claim>),
}

impl Db {
    /// `INSERT ... ON CONFLICT DO NOTHING` then read back. With `jump_in` the
    /// insert happens regardless of existing claimants; without it, any other
    /// claimant wins and the attempt reports them.
    pub async fn acquire_claim(
        &self,
        project_id: Uuid,
        bead_id: String,
        workspace_id: Uuid,
        alias: String,
        human_name: Option<String>,
        apex: Option<BeadRef>,
        jump_in: bool,
    ) -> Result<AcquireOutcome, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();
            let wid = workspace_id.to_string();

            let others: Vec<Claim> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {CLAIM_COLS} FROM domain_bead_claims
                     WHERE project_id = ?1 AND bead_id = ?2 AND workspace_id != ?3
                     ORDER BY claimed_at"
                ))?;
                let rows = stmt.query_map(params![pid, bead_id, wid], row_to_claim)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            if !others.is_empty() && !jump_in {
                return Ok(AcquireOutcome::Held(others));
            }

            tx.execute(
                "INSERT INTO domain_bead_claims
                     (project_id, bead_id, workspace_id, alias, human_name, apex, claimed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(project_id, bead_id, workspace_id) DO NOTHING",
                params![
                    pid,
                    bead_id,
                    wid,
                    alias,
                    human_name,
                    apex.as_ref().map(db::to_json),
                    db::ts(Utc::now())
                ],
            )?;

            let claim = tx.query_row(
                &format!(
                    "SELECT {CLAIM_COLS} FROM domain_bead_claims
                     WHERE project_id = ?1 AND bead_id = ?2 AND workspace_id = ?3"
                ),
                params![pid, bead_id, wid],
                row_to_claim,
            )?;
            tx.commit()?;
            Ok(AcquireOutcome::Acquired(claim))
        })
        .await
    }

    /// Releasing a claim not held is a no-op; returns whether a row existed.
    pub async fn release_claim(
        &self,
        project_id: Uuid,
        bead_id: String,
        workspace_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM domain_bead_claims
                 WHERE project_id = ?1 AND bead_id = ?2 AND workspace_id = ?3",
                params![project_id.to_string(), bead_id, workspace_id.to_string()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn claims_for_project(&self, project_id: Uuid) -> Result<Vec<Claim>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLAIM_COLS} FROM domain_bead_claims
                 WHERE project_id = ?1 ORDER BY bead_id, claimed_at"
            ))?;
            let rows = stmt
                .query_map(params![project_id.to_string()], row_to_claim)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn claims_for_bead(
        &self,
        project_id: Uuid,
        bead_id: String,
    ) -> Result<Vec<Claim>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLAIM_COLS} FROM domain_bead_claims
                 WHERE project_id = ?1 AND bead_id = ?2 ORDER BY claimed_at"
            ))?;
            let rows = stmt
                .query_map(params![project_id.to_string(), bead_id], row_to_claim)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
