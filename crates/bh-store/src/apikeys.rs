use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::error::StoreError;
use crate::projects::{parse_uuid, parse_uuid_opt};

/// What a bearer-token lookup resolves to.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub api_key_id: Uuid,
    pub project_id: Uuid,
    /// `None` for project-scoped keys (no agent binding).
    pub agent_id: Option<Uuid>,
}

impl Db {
    /// Look up an API key by the SHA-256 hex of its secret.
    pub async fn api_key_by_hash(&self, hash: String) -> Result<Option<ResolvedKey>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, project_id, agent_id FROM auth_api_keys WHERE key_hash = ?1",
                    params![hash],
                    |row| {
                        Ok(ResolvedKey {
                            api_key_id: parse_uuid(row, 0)?,
                            project_id: parse_uuid(row, 1)?,
                            agent_id: parse_uuid_opt(row, 2)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    /// Mint a project-scoped key (no agent binding), used by proxy-mode
    /// internal traffic.
    pub async fn insert_project_key(
        &self,
        id: Uuid,
        project_id: Uuid,
        key_hash: String,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO auth_api_keys (id, project_id, agent_id, key_hash, created_at)
                 VALUES (?1, ?2, NULL, ?3, ?4)",
                params![
                    id.to_string(),
                    project_id.to_string(),
                    key_hash,
                    crate::db::ts(chrono::Utc::now())
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn project_key_resolves_without_agent() {
        let db = Db::open_in_memory().await.unwrap();
        let project_id = Uuid::new_v4();
        db.insert_project_key(Uuid::new_v4(), project_id, "abc123".into())
            .await
            .unwrap();

        let resolved = db.api_key_by_hash("abc123".into()).await.unwrap().unwrap();
        assert_eq!(resolved.project_id, project_id);
        assert!(resolved.agent_id.is_none());

        assert!(db.api_key_by_hash("nope".into()).await.unwrap().is_none());
    }
}
