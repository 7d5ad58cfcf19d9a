use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use bh_core::types::{ChatMessage, ChatParticipant, ChatSession};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::parse_uuid;

const MSG_COLS: &str =
    "id, session_id, project_id, sender_workspace_id, sender_alias, body, leaving, created_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_uuid(row, 0)?,
        session_id: parse_uuid(row, 1)?,
        project_id: parse_uuid(row, 2)?,
        sender_workspace_id: parse_uuid(row, 3)?,
        sender_alias: row.get(4)?,
        body: row.get(5)?,
        leaving: row.get::<_, i64>(6)? != 0,
        created_at: db::parse_ts(&row.get::<_, String>(7)?)?,
    })
}

fn load_participants(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Vec<ChatParticipant>> {
    let mut stmt = conn.prepare(
        "SELECT workspace_id, alias, observer, has_left FROM auth_chat_participants
         WHERE session_id = ?1 ORDER BY alias",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(ChatParticipant {
            workspace_id: parse_uuid(row, 0)?,
            alias: row.get(1)?,
            observer: row.get::<_, i64>(2)? != 0,
            left: row.get::<_, i64>(3)? != 0,
        })
    })?
    .collect();
    rows
}

fn load_session(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<ChatSession>> {
    let header: Option<(String, String, String)> = conn
        .query_row(
            "SELECT project_id, created_at, updated_at FROM auth_chat_sessions WHERE id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((project_id, created_at, updated_at)) = header else {
        return Ok(None);
    };
    Ok(Some(ChatSession {
        id: Uuid::parse_str(session_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        project_id: Uuid::parse_str(&project_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        participants: load_participants(conn, session_id)?,
        created_at: db::parse_ts(&created_at)?,
        updated_at: db::parse_ts(&updated_at)?,
    }))
}

fn insert_message_tx(
    tx: &Transaction<'_>,
    message: &ChatMessage,
) -> rusqlite::Result<()> {
    tx.execute(
        &format!("INSERT INTO auth_chat_messages ({MSG_COLS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)"),
        params![
            message.id.to_string(),
            message.session_id.to_string(),
            message.project_id.to_string(),
            message.sender_workspace_id.to_string(),
            message.sender_alias,
            message.body,
            message.leaving as i64,
            db::ts(message.created_at),
        ],
    )?;
    tx.execute(
        "UPDATE auth_chat_sessions SET updated_at = ?2 WHERE id = ?1",
        params![message.session_id.to_string(), db::ts(message.created_at)],
    )?;
    Ok(())
}

/// A page of sessions with unread/pending context for the listing endpoints.
#[derive(Debug)]
pub struct SessionPage {
    pub sessions: Vec<ChatSession>,
}

impl Db {
    /// Find the session for an exact non-observer participant set, or create
    /// it. Sessions are persistent per participant group; repeated starts
    /// re-open the same one.
    pub async fn find_or_create_session(
        &self,
        project_id: Uuid,
        participants: Vec<(Uuid, String)>,
    ) -> Result<ChatSession, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();

            let mut wanted: Vec<String> =
                participants.iter().map(|(id, _)| id.to_string()).collect();
            wanted.sort();

            // Exact-set match over this project's sessions.
            let session_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM auth_chat_sessions WHERE project_id = ?1",
                )?;
                let rows = stmt.query_map(params![pid], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            for sid in &session_ids {
                let mut members: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT workspace_id FROM auth_chat_participants
                         WHERE session_id = ?1 AND observer = 0",
                    )?;
                    let rows = stmt.query_map(params![sid], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                members.sort();
                if members == wanted {
                    let session = load_session(&tx, sid)?.ok_or_else(|| {
                        rusqlite::Error::QueryReturnedNoRows
                    })?;
                    tx.commit()?;
                    return Ok(session);
                }
            }

            let id = Uuid::new_v4().to_string();
            let now = db::ts(Utc::now());
            tx.execute(
                "INSERT INTO auth_chat_sessions (id, project_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id, pid, now],
            )?;
            for (workspace_id, alias) in &participants {
                tx.execute(
                    "INSERT INTO auth_chat_participants
                         (session_id, workspace_id, alias, observer, has_left)
                     VALUES (?1, ?2, ?3, 0, 0)",
                    params![id, workspace_id.to_string(), alias],
                )?;
            }
            let session =
                load_session(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(session)
        })
        .await
    }

    pub async fn chat_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        self.call(move |conn| Ok(load_session(conn, &id.to_string())?))
            .await
    }

    /// Store a message; re-joins the sender (clears `left`) since sending
    /// into a session is participation.
    pub async fn insert_chat_message(&self, message: ChatMessage) -> Result<(), StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            insert_message_tx(&tx, &message)?;
            tx.execute(
                "UPDATE auth_chat_participants SET has_left = ?3
                 WHERE session_id = ?1 AND workspace_id = ?2",
                params![
                    message.session_id.to_string(),
                    message.sender_workspace_id.to_string(),
                    message.leaving as i64
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn chat_history(
        &self,
        session_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MSG_COLS} FROM auth_chat_messages
                 WHERE session_id = ?1 ORDER BY created_at, id LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![session_id.to_string(), limit], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Sessions the workspace participates in that hold messages from others
    /// newer than the workspace's own last message (its "pending" list).
    pub async fn chat_pending(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<(ChatSession, ChatMessage)>, StoreError> {
        self.call(move |conn| {
            let wid = workspace_id.to_string();
            let session_ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT s.id FROM auth_chat_sessions s
                     JOIN auth_chat_participants p ON p.session_id = s.id
                     WHERE s.project_id = ?1 AND p.workspace_id = ?2",
                )?;
                let rows = stmt.query_map(params![project_id.to_string(), wid], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut pending = Vec::new();
            for sid in session_ids {
                let last_own: Option<String> = conn
                    .query_row(
                        "SELECT MAX(created_at) FROM auth_chat_messages
                         WHERE session_id = ?1 AND sender_workspace_id = ?2",
                        params![sid, wid],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();
                let cutoff = last_own.unwrap_or_default();
                let newest: Option<ChatMessage> = conn
                    .query_row(
                        &format!(
                            "SELECT {MSG_COLS} FROM auth_chat_messages
                             WHERE session_id = ?1 AND sender_workspace_id != ?2
                               AND created_at > ?3
                             ORDER BY created_at DESC LIMIT 1"
                        ),
                        params![sid, wid, cutoff],
                        row_to_message,
                    )
                    .optional()?;
                if let Some(message) = newest {
                    if let Some(session) = load_session(conn, &sid)? {
                        pending.push((session, message));
                    }
                }
            }
            Ok(pending)
        })
        .await
    }

    pub async fn chat_sessions_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<SessionPage, StoreError> {
        self.call(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM auth_chat_sessions
                     WHERE project_id = ?1 ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map(params![project_id.to_string()], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let mut sessions = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(session) = load_session(conn, &id)? {
                    sessions.push(session);
                }
            }
            Ok(SessionPage { sessions })
        })
        .await
    }

    pub async fn chat_sessions_for_workspace(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<SessionPage, StoreError> {
        self.call(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT s.id FROM auth_chat_sessions s
                     JOIN auth_chat_participants p ON p.session_id = s.id
                     WHERE s.project_id = ?1 AND p.workspace_id = ?2
                     ORDER BY s.updated_at DESC",
                )?;
                let rows = stmt.query_map(
                    params![project_id.to_string(), workspace_id.to_string()],
                    |row| row.get(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let mut sessions = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(session) = load_session(conn, &id)? {
                    sessions.push(session);
                }
            }
            Ok(SessionPage { sessions })
        })
        .await
    }

    /// Idempotent observer join for dashboard users.
    pub async fn chat_join_observer(
        &self,
        session_id: Uuid,
        workspace_id: Uuid,
        alias: String,
    ) -> Result<Option<ChatSession>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let sid = session_id.to_string();
            if load_session(&tx, &sid)?.is_none() {
                return Ok(None);
            }
            tx.execute(
                "INSERT INTO auth_chat_participants
                     (session_id, workspace_id, alias, observer, has_left)
                 VALUES (?1, ?2, ?3, 1, 0)
                 ON CONFLICT(session_id, workspace_id) DO NOTHING",
                params![sid, workspace_id.to_string(), alias],
            )?;
            let session = load_session(&tx, &sid)?;
            tx.commit()?;
            Ok(session)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(session: &ChatSession, sender: Uuid, alias: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: session.id,
            project_id: session.project_id,
            sender_workspace_id: sender,
            sender_alias: alias.into(),
            body: body.into(),
            leaving: false,
            created_at: bh_core::types::round_to_micros(Utc::now()),
        }
    }

    #[tokio::test]
    async fn same_participant_set_reuses_session() {
        let db = Db::open_in_memory().await.unwrap();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let s1 = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();
        // Order must not matter.
        let s2 = db
            .find_or_create_session(
                project,
                vec![(bob, "bob".into()), (alice, "alice".into())],
            )
            .await
            .unwrap();
        assert_eq!(s1.id, s2.id);
    }

    #[tokio::test]
    async fn observers_do_not_change_set_identity() {
        let db = Db::open_in_memory().await.unwrap();
        let project = Uuid::new_v4();
        let (alice, bob, admin) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let s1 = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();
        db.chat_join_observer(s1.id, admin, "admin".into())
            .await
            .unwrap()
            .unwrap();

        let s2 = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();
        assert_eq!(s1.id, s2.id);
        assert_eq!(s2.participants.len(), 3);
        assert!(s2.participants.iter().any(|p| p.observer));
    }

    #[tokio::test]
    async fn leave_flag_set_and_cleared_by_sending() {
        let db = Db::open_in_memory().await.unwrap();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let session = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();

        let mut leave = msg(&session, bob, "bob", "ok");
        leave.leaving = true;
        db.insert_chat_message(leave).await.unwrap();
        let session = db.chat_session(session.id).await.unwrap().unwrap();
        assert!(session.participant(bob).unwrap().left);

        db.insert_chat_message(msg(&session, bob, "bob", "back"))
            .await
            .unwrap();
        let session = db.chat_session(session.id).await.unwrap().unwrap();
        assert!(!session.participant(bob).unwrap().left);
    }

    #[tokio::test]
    async fn pending_lists_sessions_with_unanswered_messages() {
        let db = Db::open_in_memory().await.unwrap();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let session = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();

        db.insert_chat_message(msg(&session, alice, "alice", "ping"))
            .await
            .unwrap();
        let pending = db.chat_pending(project, bob).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.body, "ping");

        // Bob answers; nothing pending for him anymore.
        let mut reply = msg(&session, bob, "bob", "pong");
        reply.created_at =
            bh_core::types::round_to_micros(Utc::now() + chrono::Duration::microseconds(10));
        db.insert_chat_message(reply).await.unwrap();
        assert!(db.chat_pending(project, bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_insert_ordered() {
        let db = Db::open_in_memory().await.unwrap();
        let project = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let session = db
            .find_or_create_session(
                project,
                vec![(alice, "alice".into()), (bob, "bob".into())],
            )
            .await
            .unwrap();
        for (i, body) in ["one", "two", "three"].iter().enumerate() {
            let mut m = msg(&session, alice, "alice", body);
            m.created_at = bh_core::types::round_to_micros(
                Utc::now() + chrono::Duration::microseconds(i as i64),
            );
            db.insert_chat_message(m).await.unwrap();
        }
        let history = db.chat_history(session.id, 50).await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }
}
