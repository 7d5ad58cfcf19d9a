use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::{Escalation, EscalationStatus};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::parse_uuid;

const ESC_COLS: &str =
    "id, project_id, workspace_id, alias, subject, situation, options, status,
     response, response_note, created_at, expires_at, responded_at";

fn row_to_escalation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Escalation> {
    Ok(Escalation {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        workspace_id: parse_uuid(row, 2)?,
        alias: row.get(3)?,
        subject: row.get(4)?,
        situation: row.get(5)?,
        options: db::from_json(&row.get::<_, String>(6)?)?,
        status: parse_status(&row.get::<_, String>(7)?),
        response: row.get(8)?,
        response_note: row.get(9)?,
        created_at: db::parse_ts(&row.get::<_, String>(10)?)?,
        expires_at: db::parse_ts(&row.get::<_, String>(11)?)?,
        responded_at: db::parse_ts_opt(row.get(12)?)?,
    })
}

fn parse_status(raw: &str) -> EscalationStatus {
    match raw {
        "responded" => EscalationStatus::Responded,
        "expired" => EscalationStatus::Expired,
        _ => EscalationStatus::Pending,
    }
}

/// Outcome of a respond call.
#[derive(Debug)]
pub enum RespondOutcome {
    Responded(Escalation),
    /// Same response repeated: a no-op at the API boundary.
    AlreadyResponded(Escalation),
    /// Responded earlier with a different answer.
    ResponseMismatch(Escalation),
    Expired(Escalation),
    NotFound,
}

impl Db {
    pub async fn insert_escalation(&self, escalation: Escalation) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO domain_escalations ({ESC_COLS})
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)"
                ),
                params![
                    escalation.id.to_string(),
                    escalation.project_id.to_string(),
                    escalation.workspace_id.to_string(),
                    escalation.alias,
                    escalation.subject,
                    escalation.situation,
                    db::to_json(&escalation.options),
                    "pending",
                    escalation.response,
                    escalation.response_note,
                    db::ts(escalation.created_at),
                    db::ts(escalation.expires_at),
                    db::ts_opt(escalation.responded_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Read with lazy expiry: a pending escalation past its deadline flips to
    /// `expired` on the way out.
    pub async fn escalation_by_id(
        &self,
        project_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Escalation>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            expire_due_tx(&tx, &project_id.to_string(), now)?;
            let escalation = tx
                .query_row(
                    &format!(
                        "SELECT {ESC_COLS} FROM domain_escalations
                         WHERE id = ?1 AND project_id = ?2"
                    ),
                    params![id.to_string(), project_id.to_string()],
                    row_to_escalation,
                )
                .optional()?;
            tx.commit()?;
            Ok(escalation)
        })
        .await
    }

    pub async fn escalations_for_project(
        &self,
        project_id: Uuid,
        status: Option<EscalationStatus>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Escalation>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();
            expire_due_tx(&tx, &pid, now)?;
            let rows = match status {
                Some(status) => {
                    let raw = match status {
                        EscalationStatus::Pending => "pending",
                        EscalationStatus::Responded => "responded",
                        EscalationStatus::Expired => "expired",
                    };
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ESC_COLS} FROM domain_escalations
                         WHERE project_id = ?1 AND status = ?2
                         ORDER BY created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map(params![pid, raw], row_to_escalation)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {ESC_COLS} FROM domain_escalations
                         WHERE project_id = ?1 ORDER BY created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map(params![pid], row_to_escalation)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            tx.commit()?;
            Ok(rows)
        })
        .await
    }

    /// `pending → responded`, idempotent on the same response.
    pub async fn respond_escalation(
        &self,
        project_id: Uuid,
        id: Uuid,
        response: String,
        response_note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RespondOutcome, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();
            expire_due_tx(&tx, &pid, now)?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {ESC_COLS} FROM domain_escalations
                         WHERE id = ?1 AND project_id = ?2"
                    ),
                    params![id.to_string(), pid],
                    row_to_escalation,
                )
                .optional()?;
            let Some(existing) = existing else {
                return Ok(RespondOutcome::NotFound);
            };

            let outcome = match existing.status {
                EscalationStatus::Expired => RespondOutcome::Expired(existing),
                EscalationStatus::Responded => {
                    if existing.response.as_deref() == Some(response.as_str()) {
                        RespondOutcome::AlreadyResponded(existing)
                    } else {
                        RespondOutcome::ResponseMismatch(existing)
                    }
                }
                EscalationStatus::Pending => {
                    tx.execute(
                        "UPDATE domain_escalations
                         SET status = 'responded', response = ?2, response_note = ?3,
                             responded_at = ?4
                         WHERE id = ?1",
                        params![id.to_string(), response, response_note, db::ts(now)],
                    )?;
                    let updated = tx.query_row(
                        &format!("SELECT {ESC_COLS} FROM domain_escalations WHERE id = ?1"),
                        params![id.to_string()],
                        row_to_escalation,
                    )?;
                    RespondOutcome::Responded(updated)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }
}

fn expire_due_tx(
    tx: &rusqlite::Transaction<'_>,
    project_id: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE domain_escalations SET status = 'expired'
         WHERE project_id = ?1 AND status = 'pending' AND expires_at <= ?2",
        params![project_id, db::ts(now)],
    )?;
    Ok(())
}
