use chrono::{DateTime, Utc};
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{round_to_micros, Escalation, EscalationStatus, Workspace};
use bh_core::validate;
use bh_ephemeral::Ephemeral;
use bh_store::{Db, RespondOutcome};

/// Default lifetime when the caller sets no expiry.
pub const DEFAULT_EXPIRY_HOURS: i64 = 72;

/// Escalations: a workspace's request for human intervention, with a bounded
/// response window.
#[derive(Clone)]
pub struct EscalationEngine {
    db: Db,
    eph: Ephemeral,
}

impl EscalationEngine {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self { db, eph }
    }

    pub async fn create(
        &self,
        project_slug: &str,
        workspace: &Workspace,
        subject: String,
        situation: String,
        options: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Escalation> {
        validate::validate_subject(&subject)?;
        validate::validate_body(&situation)?;

        let now = round_to_micros(Utc::now());
        let escalation = Escalation {
            id: Uuid::new_v4(),
            project_id: workspace.project_id,
            workspace_id: workspace.id,
            alias: workspace.alias.clone(),
            subject,
            situation,
            options,
            status: EscalationStatus::Pending,
            response: None,
            response_note: None,
            created_at: now,
            expires_at: round_to_micros(
                expires_at.unwrap_or(now + chrono::Duration::hours(DEFAULT_EXPIRY_HOURS)),
            ),
            responded_at: None,
        };
        self.db.insert_escalation(escalation.clone()).await?;

        self.eph.bus.publish(
            Event::new(
                EventType::EscalationCreated,
                workspace.project_id,
                project_slug,
            )
            .workspace(workspace.id, &workspace.alias)
            .data(serde_json::json!({
                "escalation_id": escalation.id,
                "subject": escalation.subject,
            })),
        );
        Ok(escalation)
    }

    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<Escalation> {
        self.db
            .escalation_by_id(project_id, id, Utc::now())
            .await?
            .ok_or_else(|| Error::NotFound("escalation not found".into()))
    }

    pub async fn list(
        &self,
        project_id: Uuid,
        status: Option<EscalationStatus>,
    ) -> Result<Vec<Escalation>> {
        Ok(self
            .db
            .escalations_for_project(project_id, status, Utc::now())
            .await?)
    }

    /// Respond. Idempotent at the boundary: repeating the same response on
    /// the same id is a no-op; a different response conflicts.
    pub async fn respond(
        &self,
        project_id: Uuid,
        project_slug: &str,
        id: Uuid,
        response: String,
        response_note: Option<String>,
    ) -> Result<Escalation> {
        match self
            .db
            .respond_escalation(project_id, id, response, response_note, Utc::now())
            .await?
        {
            RespondOutcome::Responded(escalation) => {
                self.eph.bus.publish(
                    Event::new(EventType::EscalationResponded, project_id, project_slug).data(
                        serde_json::json!({
                            "escalation_id": escalation.id,
                            "response": escalation.response,
                        }),
                    ),
                );
                Ok(escalation)
            }
            RespondOutcome::AlreadyResponded(escalation) => Ok(escalation),
            RespondOutcome::ResponseMismatch(escalation) => Err(Error::conflict(format!(
                "escalation already responded with {:?}",
                escalation.response.unwrap_or_default()
            ))),
            RespondOutcome::Expired(_) => Err(Error::conflict("escalation has expired")),
            RespondOutcome::NotFound => Err(Error::NotFound("escalation not found".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::WorkspaceKind;
    use std::time::Duration;

    fn workspace(project: Uuid) -> Workspace {
        let now = Utc::now();
        Workspace {
            id: Uuid::new_v4(),
            project_id: project,
            repo_id: None,
            kind: WorkspaceKind::Agent,
            alias: "alice".into(),
            human_name: None,
            role: None,
            current_branch: None,
            focus: None,
            host: None,
            path: None,
            timezone: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            last_seen_at: None,
        }
    }

    async fn engine() -> EscalationEngine {
        EscalationEngine::new(
            Db::open_in_memory().await.unwrap(),
            Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300)),
        )
    }

    #[tokio::test]
    async fn create_applies_default_expiry() {
        let engine = engine().await;
        let ws = workspace(Uuid::new_v4());
        let escalation = engine
            .create(
                "demo",
                &ws,
                "need a decision".into(),
                "two viable options".into(),
                vec!["a".into(), "b".into()],
                None,
            )
            .await
            .unwrap();
        let window = escalation.expires_at - escalation.created_at;
        assert_eq!(window, chrono::Duration::hours(72));
    }

    #[tokio::test]
    async fn respond_twice_same_answer_is_noop() {
        let engine = engine().await;
        let ws = workspace(Uuid::new_v4());
        let escalation = engine
            .create(
                "demo",
                &ws,
                "subject".into(),
                "situation".into(),
                vec![],
                None,
            )
            .await
            .unwrap();

        let first = engine
            .respond(ws.project_id, "demo", escalation.id, "a".into(), None)
            .await
            .unwrap();
        assert_eq!(first.status, EscalationStatus::Responded);

        let second = engine
            .respond(ws.project_id, "demo", escalation.id, "a".into(), None)
            .await
            .unwrap();
        assert_eq!(second.responded_at, first.responded_at);

        let err = engine
            .respond(ws.project_id, "demo", escalation.id, "b".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn expired_escalation_rejects_response() {
        let engine = engine().await;
        let ws = workspace(Uuid::new_v4());
        let escalation = engine
            .create(
                "demo",
                &ws,
                "subject".into(),
                "situation".into(),
                vec![],
                Some(Utc::now() - chrono::Duration::seconds(1)),
            )
            .await
            .unwrap();

        let read = engine.get(ws.project_id, escalation.id).await.unwrap();
        assert_eq!(read.status, EscalationStatus::Expired);

        let err = engine
            .respond(ws.project_id, "demo", escalation.id, "a".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }
}
