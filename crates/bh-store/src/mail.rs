use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::{MailMessage, MailPriority};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::{parse_uuid, parse_uuid_opt};

const MAIL_COLS: &str =
    "id, project_id, from_workspace_id, from_alias, to_workspace_id, subject, body,
     priority, thread_id, read, read_by, read_at, created_at";

fn row_to_mail(row: &rusqlite::Row<'_>) -> rusqlite::Result<MailMessage> {
    Ok(MailMessage {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        from_workspace_id: parse_uuid(row, 2)?,
        from_alias: row.get(3)?,
        to_workspace_id: parse_uuid(row, 4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        priority: parse_priority(&row.get::<_, String>(7)?),
        thread_id: parse_uuid_opt(row, 8)?,
        read: row.get::<_, i64>(9)? != 0,
        read_by: parse_uuid_opt(row, 10)?,
        read_at: db::parse_ts_opt(row.get(11)?)?,
        created_at: db::parse_ts(&row.get::<_, String>(12)?)?,
    })
}

fn parse_priority(raw: &str) -> MailPriority {
    match raw {
        "low" => MailPriority::Low,
        "high" => MailPriority::High,
        "urgent" => MailPriority::Urgent,
        _ => MailPriority::Normal,
    }
}

fn priority_str(priority: MailPriority) -> &'static str {
    match priority {
        MailPriority::Low => "low",
        MailPriority::Normal => "normal",
        MailPriority::High => "high",
        MailPriority::Urgent => "urgent",
    }
}

/// Outcome of an acknowledge call.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ack; `read_at` was set now.
    Acknowledged(DateTime<Utc>),
    /// Already read; `read_at` is the original time.
    AlreadyRead(DateTime<Utc>),
    NotFound,
}

impl Db {
    pub async fn insert_mail(&self, mail: MailMessage) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO auth_messages ({MAIL_COLS})
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)"
                ),
                params![
                    mail.id.to_string(),
                    mail.project_id.to_string(),
                    mail.from_workspace_id.to_string(),
                    mail.from_alias,
                    mail.to_workspace_id.to_string(),
                    mail.subject,
                    mail.body,
                    priority_str(mail.priority),
                    mail.thread_id.map(|id| id.to_string()),
                    mail.read as i64,
                    mail.read_by.map(|id| id.to_string()),
                    db::ts_opt(mail.read_at),
                    db::ts(mail.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mail_by_id(
        &self,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<MailMessage>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {MAIL_COLS} FROM auth_messages
                         WHERE id = ?1 AND project_id = ?2"
                    ),
                    params![id.to_string(), project_id.to_string()],
                    row_to_mail,
                )
                .optional()?)
        })
        .await
    }

    /// Inbox for one workspace, newest first, keyed for cursor pagination on
    /// `created_at || id`.
    pub async fn inbox(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
        unread_only: bool,
        before: Option<String>,
        limit: u32,
    ) -> Result<(Vec<MailMessage>, Option<String>), StoreError> {
        self.call(move |conn| {
            let mut sql = format!(
                "SELECT {MAIL_COLS} FROM auth_messages
                 WHERE project_id = ?1 AND to_workspace_id = ?2"
            );
            let pid = project_id.to_string();
            let wid = workspace_id.to_string();
            let mut args: Vec<Box<dyn rusqlite::ToSql + Send>> =
                vec![Box::new(pid), Box::new(wid)];
            if unread_only {
                sql.push_str(" AND read = 0");
            }
            if let Some(before) = &before {
                args.push(Box::new(before.clone()));
                sql.push_str(&format!(" AND created_at || id < ?{}", args.len()));
            }
            sql.push_str(&format!(
                " ORDER BY created_at DESC, id DESC LIMIT {}",
                limit as i64 + 1
            ));

            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> =
                args.iter().map(|b| b.as_ref() as &dyn rusqlite::ToSql).collect();
            let mut items = stmt
                .query_map(params_ref.as_slice(), row_to_mail)?
                .collect::<Result<Vec<_>, _>>()?;

            let next = if items.len() as u32 > limit {
                items.truncate(limit as usize);
                items
                    .last()
                    .map(|m| format!("{}{}", db::ts(m.created_at), m.id))
            } else {
                None
            };
            Ok((items, next))
        })
        .await
    }

    /// Idempotent acknowledge: only the first call sets `read_at`.
    pub async fn acknowledge_mail(
        &self,
        project_id: Uuid,
        message_id: Uuid,
        reader: Uuid,
    ) -> Result<AckOutcome, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let existing: Option<(bool, Option<String>)> = tx
                .query_row(
                    "SELECT read, read_at FROM auth_messages
                     WHERE id = ?1 AND project_id = ?2 AND to_workspace_id = ?3",
                    params![
                        message_id.to_string(),
                        project_id.to_string(),
                        reader.to_string()
                    ],
                    |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                None => AckOutcome::NotFound,
                Some((true, read_at)) => {
                    let at = db::parse_ts(&read_at.unwrap_or_default())?;
                    AckOutcome::AlreadyRead(at)
                }
                Some((false, _)) => {
                    let now = bh_core::types::round_to_micros(Utc::now());
                    tx.execute(
                        "UPDATE auth_messages SET read = 1, read_by = ?2, read_at = ?3
                         WHERE id = ?1",
                        params![message_id.to_string(), reader.to_string(), db::ts(now)],
                    )?;
                    AckOutcome::Acknowledged(now)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    pub async fn unread_count(
        &self,
        project_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM auth_messages
                 WHERE project_id = ?1 AND to_workspace_id = ?2 AND read = 0",
                params![project_id.to_string(), workspace_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(project: Uuid, from: Uuid, to: Uuid, subject: &str) -> MailMessage {
        MailMessage {
            id: Uuid::new_v4(),
            project_id: project,
            from_workspace_id: from,
            from_alias: "alice".into(),
            to_workspace_id: to,
            subject: subject.into(),
            body: "hello".into(),
            priority: MailPriority::Normal,
            thread_id: None,
            read: false,
            read_by: None,
            read_at: None,
            created_at: bh_core::types::round_to_micros(Utc::now()),
        }
    }

    #[tokio::test]
    async fn ack_twice_keeps_first_read_at() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, from, to) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let msg = mail(project, from, to, "hi");
        db.insert_mail(msg.clone()).await.unwrap();

        let first = db.acknowledge_mail(project, msg.id, to).await.unwrap();
        let AckOutcome::Acknowledged(at) = first else {
            panic!("expected acknowledged: {first:?}");
        };

        let second = db.acknowledge_mail(project, msg.id, to).await.unwrap();
        assert_eq!(second, AckOutcome::AlreadyRead(at));
    }

    #[tokio::test]
    async fn ack_requires_recipient() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, from, to) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let msg = mail(project, from, to, "hi");
        db.insert_mail(msg.clone()).await.unwrap();

        let outcome = db
            .acknowledge_mail(project, msg.id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::NotFound);
    }

    #[tokio::test]
    async fn inbox_orders_newest_first_and_paginates() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, from, to) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for i in 0..3 {
            let mut m = mail(project, from, to, &format!("m{i}"));
            m.created_at = bh_core::types::round_to_micros(
                Utc::now() + chrono::Duration::microseconds(i),
            );
            db.insert_mail(m).await.unwrap();
        }

        let (page, next) = db.inbox(project, to, false, None, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].subject, "m2");
        let (rest, next2) = db.inbox(project, to, false, next, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].subject, "m0");
        assert!(next2.is_none());
    }

    #[tokio::test]
    async fn unread_only_filter() {
        let db = Db::open_in_memory().await.unwrap();
        let (project, from, to) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let m1 = mail(project, from, to, "m1");
        let m2 = mail(project, from, to, "m2");
        db.insert_mail(m1.clone()).await.unwrap();
        db.insert_mail(m2).await.unwrap();
        db.acknowledge_mail(project, m1.id, to).await.unwrap();

        let (unread, _) = db.inbox(project, to, true, None, 50).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].subject, "m2");
        assert_eq!(db.unread_count(project, to).await.unwrap(), 1);
    }
}
