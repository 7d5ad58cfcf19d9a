use chrono::Utc;
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{round_to_micros, MailMessage, MailPriority, Workspace};
use bh_core::validate;
use bh_ephemeral::Ephemeral;
use bh_store::{AckOutcome, Db};

/// Durable mail between workspaces. Delivery is at-least-once: the row is
/// written, a `message.delivered` event fans out, and the recipient's waits
/// on any shared chat session are untouched; mail has no blocking reads.
#[derive(Clone)]
pub struct MailPlane {
    db: Db,
    eph: Ephemeral,
}

impl MailPlane {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self { db, eph }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        project_slug: &str,
        from: &Workspace,
        to: &Workspace,
        subject: String,
        body: String,
        priority: MailPriority,
        thread_id: Option<Uuid>,
    ) -> Result<MailMessage> {
        validate::validate_subject(&subject)?;
        validate::validate_body(&body)?;
        if from.project_id != to.project_id {
            return Err(Error::Forbidden("recipient is in another project".into()));
        }

        let mail = MailMessage {
            id: Uuid::new_v4(),
            project_id: from.project_id,
            from_workspace_id: from.id,
            from_alias: from.alias.clone(),
            to_workspace_id: to.id,
            subject,
            body,
            priority,
            thread_id,
            read: false,
            read_by: None,
            read_at: None,
            created_at: round_to_micros(Utc::now()),
        };
        self.db.insert_mail(mail.clone()).await?;

        self.eph.bus.publish(
            Event::new(EventType::MessageDelivered, from.project_id, project_slug)
                .workspace(from.id, &from.alias)
                .data(serde_json::json!({
                    "message_id": mail.id,
                    "to_alias": to.alias,
                    "subject": mail.subject,
                })),
        );
        tracing::debug!(
            message_id = %mail.id,
            from = %from.alias,
            to = %to.alias,
            "mail stored"
        );
        Ok(mail)
    }

    /// Internal send used by the dispatcher, addressed by workspace id only.
    pub async fn send_system(
        &self,
        project_id: Uuid,
        project_slug: &str,
        to_workspace_id: Uuid,
        subject: String,
        body: String,
        priority: MailPriority,
    ) -> Result<MailMessage> {
        let mail = MailMessage {
            id: Uuid::new_v4(),
            project_id,
            // The nil id marks server-originated mail.
            from_workspace_id: Uuid::nil(),
            from_alias: "beadhub".into(),
            to_workspace_id,
            subject,
            body,
            priority,
            thread_id: None,
            read: false,
            read_by: None,
            read_at: None,
            created_at: round_to_micros(Utc::now()),
        };
        self.db.insert_mail(mail.clone()).await?;
        self.eph.bus.publish(
            Event::new(EventType::MessageDelivered, project_id, project_slug).data(
                serde_json::json!({
                    "message_id": mail.id,
                    "subject": mail.subject,
                    "system": true,
                }),
            ),
        );
        Ok(mail)
    }

    pub async fn inbox(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
        unread_only: bool,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<MailMessage>, Option<String>)> {
        Ok(self
            .db
            .inbox(project_id, workspace_id, unread_only, cursor, limit)
            .await?)
    }

    /// Idempotent: the first ack sets `read_at`; later acks return it
    /// unchanged.
    pub async fn acknowledge(
        &self,
        project_slug: &str,
        project_id: Uuid,
        message_id: Uuid,
        reader: &Workspace,
    ) -> Result<MailMessage> {
        match self
            .db
            .acknowledge_mail(project_id, message_id, reader.id)
            .await?
        {
            AckOutcome::Acknowledged(_) => {
                self.eph.bus.publish(
                    Event::new(EventType::MessageAcknowledged, project_id, project_slug)
                        .workspace(reader.id, &reader.alias)
                        .data(serde_json::json!({ "message_id": message_id })),
                );
            }
            AckOutcome::AlreadyRead(_) => {}
            AckOutcome::NotFound => {
                return Err(Error::NotFound("message not found".into()));
            }
        }
        self.db
            .mail_by_id(project_id, message_id)
            .await?
            .ok_or_else(|| Error::NotFound("message not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::WorkspaceKind;
    use std::time::Duration;

    fn workspace(project: Uuid, alias: &str) -> Workspace {
        let now = Utc::now();
        Workspace {
            id: Uuid::new_v4(),
            project_id: project,
            repo_id: None,
            kind: WorkspaceKind::Agent,
            alias: alias.into(),
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

    async fn plane() -> MailPlane {
        MailPlane::new(
            Db::open_in_memory().await.unwrap(),
            Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300)),
        )
    }

    #[tokio::test]
    async fn send_and_ack_round_trip() {
        let plane = plane().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        let mail = plane
            .send(
                "demo",
                &alice,
                &bob,
                "hello".into(),
                "body".into(),
                MailPriority::Normal,
                None,
            )
            .await
            .unwrap();

        let acked = plane
            .acknowledge("demo", project, mail.id, &bob)
            .await
            .unwrap();
        assert!(acked.read);
        let first_read_at = acked.read_at.unwrap();

        let again = plane
            .acknowledge("demo", project, mail.id, &bob)
            .await
            .unwrap();
        assert_eq!(again.read_at, Some(first_read_at));
    }

    #[tokio::test]
    async fn body_bounds_are_enforced() {
        let plane = plane().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        let err = plane
            .send(
                "demo",
                &alice,
                &bob,
                "s".into(),
                String::new(),
                MailPriority::Normal,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");

        let err = plane
            .send(
                "demo",
                &alice,
                &bob,
                "s".into(),
                "x".repeat(64 * 1024 + 1),
                MailPriority::Normal,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn cross_project_send_is_forbidden() {
        let plane = plane().await;
        let alice = workspace(Uuid::new_v4(), "alice");
        let bob = workspace(Uuid::new_v4(), "bob");
        let err = plane
            .send(
                "demo",
                &alice,
                &bob,
                "s".into(),
                "b".into(),
                MailPriority::Normal,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
