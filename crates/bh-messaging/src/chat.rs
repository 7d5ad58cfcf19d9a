use chrono::{DateTime, Utc};
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{round_to_micros, ChatMessage, ChatSession, Workspace};
use bh_core::validate;
use bh_ephemeral::{Ephemeral, WaitRelease};
use bh_store::Db;

/// Default wait when the opener flags the message as starting a
/// conversation.
pub const WAIT_START_CONVERSATION_SECS: i64 = 300;
/// Default wait otherwise.
pub const WAIT_DEFAULT_SECS: i64 = 60;
/// Hard cap on any wait, extensions included.
pub const WAIT_HARD_CAP_SECS: i64 = 600;

/// How a send blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Fire and return.
    None,
    /// Block until a reply, a peer leave, or the deadline.
    Wait { seconds: Option<i64>, start_conversation: bool },
}

#[derive(Debug)]
pub struct StartOutcome {
    pub session: ChatSession,
    pub initial_message_id: Uuid,
    pub delivered: bool,
    /// Release observed when the sender chose to wait.
    pub release: Option<ReleaseSummary>,
}

#[derive(Debug)]
pub struct SendOutcome {
    pub message_id: Uuid,
    pub delivered: bool,
    pub release: Option<ReleaseSummary>,
}

/// Wire-friendly form of a wait release.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseSummary {
    Reply { message: ChatMessage },
    PeerLeft { alias: String },
    Deadline,
    Cancelled,
}

impl From<WaitRelease> for ReleaseSummary {
    fn from(release: WaitRelease) -> Self {
        match release {
            WaitRelease::Reply(message) => ReleaseSummary::Reply { message },
            WaitRelease::PeerLeft { alias } => ReleaseSummary::PeerLeft { alias },
            WaitRelease::Deadline => ReleaseSummary::Deadline,
            WaitRelease::Cancelled => ReleaseSummary::Cancelled,
        }
    }
}

/// Persistent chat sessions with send-and-wait/send-and-leave semantics.
#[derive(Clone)]
pub struct ChatPlane {
    db: Db,
    eph: Ephemeral,
}

impl ChatPlane {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self { db, eph }
    }

    /// Open (or re-open) the session for `from` plus `to_aliases` and send
    /// the first message.
    pub async fn start(
        &self,
        project_slug: &str,
        from: &Workspace,
        to_aliases: Vec<String>,
        body: String,
        wait: WaitMode,
        leaving: bool,
    ) -> Result<StartOutcome> {
        validate::validate_body(&body)?;
        if to_aliases.is_empty() {
            return Err(Error::Validation("at least one recipient alias".into()));
        }

        // Resolve aliases to active workspaces in this project.
        let all = self
            .db
            .workspaces_for_project(from.project_id, false)
            .await?;
        let mut participants = vec![(from.id, from.alias.clone())];
        for alias in &to_aliases {
            let member = all
                .iter()
                .find(|w| &w.alias == alias)
                .ok_or_else(|| Error::NotFound(format!("no active workspace {alias:?}")))?;
            if !participants.iter().any(|(id, _)| *id == member.id) {
                participants.push((member.id, member.alias.clone()));
            }
        }

        let session = self
            .db
            .find_or_create_session(from.project_id, participants)
            .await?;
        let outcome = self
            .send_into(project_slug, &session, from, body, wait, leaving)
            .await?;
        let session = self
            .db
            .chat_session(session.id)
            .await?
            .ok_or_else(|| Error::Internal("session vanished".into()))?;
        Ok(StartOutcome {
            session,
            initial_message_id: outcome.message_id,
            delivered: outcome.delivered,
            release: outcome.release,
        })
    }

    /// Send into an existing session.
    pub async fn send(
        &self,
        project_slug: &str,
        session_id: Uuid,
        from: &Workspace,
        body: String,
        wait: WaitMode,
        leaving: bool,
    ) -> Result<SendOutcome> {
        validate::validate_body(&body)?;
        let session = self.session_for(session_id, from).await?;
        self.send_into(project_slug, &session, from, body, wait, leaving)
            .await
    }

    async fn send_into(
        &self,
        project_slug: &str,
        session: &ChatSession,
        from: &Workspace,
        body: String,
        wait: WaitMode,
        leaving: bool,
    ) -> Result<SendOutcome> {
        if leaving && matches!(wait, WaitMode::Wait { .. }) {
            return Err(Error::Validation(
                "cannot wait on a message flagged as leaving".into(),
            ));
        }
        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id: session.id,
            project_id: session.project_id,
            sender_workspace_id: from.id,
            sender_alias: from.alias.clone(),
            body,
            leaving,
            created_at: round_to_micros(Utc::now()),
        };
        self.db.insert_chat_message(message.clone()).await?;

        // `delivered` reflects observation: someone is blocked on this
        // session or following it live right now.
        let delivered = self.eph.waits.has_waiters_except(session.id, from.id)
            || self.eph.bus.subscriber_count(session.project_id) > 0;

        // A message releases every other waiter; a leave releases them even
        // without a reply.
        let release = if leaving {
            WaitRelease::PeerLeft {
                alias: from.alias.clone(),
            }
        } else {
            WaitRelease::Reply(message.clone())
        };
        self.eph.waits.signal_except(session.id, from.id, release);

        self.eph.bus.publish(
            Event::new(
                EventType::ChatMessageSent,
                session.project_id,
                project_slug,
            )
            .workspace(from.id, &from.alias)
            .data(serde_json::json!({
                "session_id": session.id,
                "message_id": message.id,
                "leaving": leaving,
            })),
        );

        let release = match wait {
            WaitMode::None => None,
            WaitMode::Wait {
                seconds,
                start_conversation,
            } => Some(
                self.wait_for_reply(session.id, from.id, seconds, start_conversation)
                    .await?,
            ),
        };

        Ok(SendOutcome {
            message_id: message.id,
            delivered,
            release,
        })
    }

    async fn wait_for_reply(
        &self,
        session_id: Uuid,
        waiter: Uuid,
        seconds: Option<i64>,
        start_conversation: bool,
    ) -> Result<ReleaseSummary> {
        let default = if start_conversation {
            WAIT_START_CONVERSATION_SECS
        } else {
            WAIT_DEFAULT_SECS
        };
        let seconds = seconds.unwrap_or(default);
        if seconds < 0 || seconds > WAIT_HARD_CAP_SECS {
            return Err(Error::Validation(format!(
                "wait must be 0..={WAIT_HARD_CAP_SECS} seconds"
            )));
        }
        let now = Utc::now();
        let handle = self.eph.waits.register(
            session_id,
            waiter,
            now + chrono::Duration::seconds(seconds),
            now + chrono::Duration::seconds(WAIT_HARD_CAP_SECS),
        );
        Ok(handle.wait().await.into())
    }

    /// Refresh the caller's wait deadline, clamped to the hard cap.
    pub async fn extend_wait(
        &self,
        session_id: Uuid,
        workspace_id: Uuid,
        seconds: i64,
    ) -> Result<DateTime<Utc>> {
        if seconds <= 0 {
            return Err(Error::Validation("extension must be positive".into()));
        }
        self.eph
            .waits
            .extend(
                session_id,
                workspace_id,
                Utc::now() + chrono::Duration::seconds(seconds),
            )
            .ok_or_else(|| Error::NotFound("no active wait for this session".into()))
    }

    pub async fn history(
        &self,
        session_id: Uuid,
        viewer: &Workspace,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let _ = self.session_for(session_id, viewer).await?;
        Ok(self.db.chat_history(session_id, limit).await?)
    }

    pub async fn pending(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<(ChatSession, ChatMessage)>> {
        Ok(self.db.chat_pending(project_id, workspace_id).await?)
    }

    pub async fn sessions_for(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<ChatSession>> {
        Ok(self
            .db
            .chat_sessions_for_workspace(project_id, workspace_id)
            .await?
            .sessions)
    }

    /// Admin listing across the project (dashboard capability).
    pub async fn admin_sessions(&self, project_id: Uuid) -> Result<Vec<ChatSession>> {
        Ok(self.db.chat_sessions_for_project(project_id).await?.sessions)
    }

    /// Idempotent observer join for dashboard identities.
    pub async fn admin_join(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        observer: &Workspace,
    ) -> Result<ChatSession> {
        let session = self
            .db
            .chat_join_observer(session_id, observer.id, observer.alias.clone())
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.project_id != project_id {
            return Err(Error::NotFound("session not found".into()));
        }
        Ok(session)
    }

    /// Admin history does not require participation, only the project scope.
    pub async fn admin_history(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let session = self
            .db
            .chat_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.project_id != project_id {
            return Err(Error::NotFound("session not found".into()));
        }
        Ok(self.db.chat_history(session_id, limit).await?)
    }

    /// Tear down a wait on client disconnect.
    pub fn cancel_wait(&self, session_id: Uuid, workspace_id: Uuid) {
        self.eph.waits.cancel(session_id, workspace_id);
    }

    async fn session_for(&self, session_id: Uuid, viewer: &Workspace) -> Result<ChatSession> {
        let session = self
            .db
            .chat_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.project_id != viewer.project_id {
            return Err(Error::NotFound("session not found".into()));
        }
        if !session.is_participant(viewer.id) {
            return Err(Error::Forbidden("not a participant".into()));
        }
        Ok(session)
    }
}
