use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::{Policy, PolicyBundle};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::projects::{parse_uuid, parse_uuid_opt};

const POLICY_COLS: &str = "id, project_id, version, bundle, created_at, created_by";

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Policy> {
    Ok(Policy {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        version: row.get(2)?,
        bundle: db::from_json(&row.get::<_, String>(3)?)?,
        created_at: db::parse_ts(&row.get::<_, String>(4)?)?,
        created_by: parse_uuid_opt(row, 5)?,
    })
}

/// Outcome of a policy create.
#[derive(Debug)]
pub enum PolicyCreate {
    /// A new version was allocated.
    Created(Policy),
    /// The bundle is byte-identical to the latest version; nothing inserted.
    Unchanged(Policy),
    /// `base_policy_id` did not match the project's active policy.
    BaseMismatch { active_policy_id: Option<Uuid> },
    ProjectNotFound,
}

impl Db {
    /// Create a policy version with optimistic concurrency.
    ///
    /// The whole allocation runs in one transaction: re-read the project's
    /// active pointer, compare against `base_policy_id` when supplied, take
    /// `max(version) + 1`, insert. The serialised writer makes the version
    /// sequence contiguous per project.
    pub async fn create_policy(
        &self,
        project_id: Uuid,
        bundle: PolicyBundle,
        bundle_bytes: Vec<u8>,
        base_policy_id: Option<Uuid>,
        created_by: Option<Uuid>,
    ) -> Result<PolicyCreate, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();

            let active: Option<Option<String>> = tx
                .query_row(
                    "SELECT active_policy_id FROM domain_projects
                     WHERE id = ?1 AND deleted_at IS NULL",
                    params![pid],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(active_policy_id) = active else {
                return Ok(PolicyCreate::ProjectNotFound);
            };
            let active_uuid = active_policy_id
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok());

            if let Some(base) = base_policy_id {
                if active_uuid != Some(base) {
                    return Ok(PolicyCreate::BaseMismatch {
                        active_policy_id: active_uuid,
                    });
                }
            }

            // Idempotent create: identical bytes return the latest row as-is.
            let latest: Option<Policy> = tx
                .query_row(
                    &format!(
                        "SELECT {POLICY_COLS} FROM domain_project_policies
                         WHERE project_id = ?1 ORDER BY version DESC LIMIT 1"
                    ),
                    params![pid],
                    row_to_policy,
                )
                .optional()?;
            if let Some(latest) = &latest {
                let latest_bytes: String = tx.query_row(
                    "SELECT bundle FROM domain_project_policies WHERE id = ?1",
                    params![latest.id.to_string()],
                    |row| row.get(0),
                )?;
                if latest_bytes.as_bytes() == bundle_bytes.as_slice() {
                    tx.commit()?;
                    return Ok(PolicyCreate::Unchanged(latest.clone()));
                }
            }

            let next_version = latest.as_ref().map(|p| p.version + 1).unwrap_or(1);
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO domain_project_policies
                     (id, project_id, version, bundle, created_at, created_by)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    id,
                    pid,
                    next_version,
                    String::from_utf8(bundle_bytes).unwrap_or_else(|_| db::to_json(&bundle)),
                    db::ts(Utc::now()),
                    created_by.map(|u| u.to_string()),
                ],
            )?;
            let created = tx.query_row(
                &format!("SELECT {POLICY_COLS} FROM domain_project_policies WHERE id = ?1"),
                params![id],
                row_to_policy,
            )?;
            tx.commit()?;
            Ok(PolicyCreate::Created(created))
        })
        .await
    }

    /// Point the project's active-policy pointer at `policy_id`. Returns the
    /// policy, or `None` when it does not exist in this project.
    pub async fn activate_policy(
        &self,
        project_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<Policy>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let policy = tx
                .query_row(
                    &format!(
                        "SELECT {POLICY_COLS} FROM domain_project_policies
                         WHERE id = ?1 AND project_id = ?2"
                    ),
                    params![policy_id.to_string(), project_id.to_string()],
                    row_to_policy,
                )
                .optional()?;
            if policy.is_some() {
                tx.execute(
                    "UPDATE domain_projects SET active_policy_id = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![
                        project_id.to_string(),
                        policy_id.to_string(),
                        db::ts(Utc::now())
                    ],
                )?;
            }
            tx.commit()?;
            Ok(policy)
        })
        .await
    }

    pub async fn active_policy(&self, project_id: Uuid) -> Result<Option<Policy>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT p.id, p.project_id, p.version, p.bundle, p.created_at, p.created_by
                     FROM domain_project_policies p
                     JOIN domain_projects pr ON pr.active_policy_id = p.id
                     WHERE pr.id = ?1",
                    params![project_id.to_string()],
                    row_to_policy,
                )
                .optional()?)
        })
        .await
    }

    pub async fn policy_by_id(
        &self,
        project_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<Policy>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {POLICY_COLS} FROM domain_project_policies
                         WHERE id = ?1 AND project_id = ?2"
                    ),
                    params![policy_id.to_string(), project_id.to_string()],
                    row_to_policy,
                )
                .optional()?)
        })
        .await
    }

    /// Newest first.
    pub async fn policy_history(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Policy>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLS} FROM domain_project_policies
                 WHERE project_id = ?1 ORDER BY version DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![project_id.to_string(), limit], row_to_policy)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::PolicyInvariant;

    async fn seed_project(db: &Db) -> Uuid {
        let project_id = Uuid::new_v4();
        db.call({
            let pid = project_id.to_string();
            move |conn| {
                let now = db::ts(Utc::now());
                conn.execute(
                    "INSERT INTO domain_projects (id, slug, visibility, created_at, updated_at)
                     VALUES (?1, 'demo', 'private', ?2, ?2)",
                    params![pid, now],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();
        project_id
    }

    fn bundle(tag: &str) -> (PolicyBundle, Vec<u8>) {
        let bundle = PolicyBundle {
            invariants: vec![PolicyInvariant {
                id: tag.into(),
                title: "t".into(),
                body: "b".into(),
            }],
            roles: Default::default(),
            adapters: serde_json::Value::Null,
        };
        let bytes = bh_core::policy::canonical_bytes(&bundle).unwrap();
        (bundle, bytes)
    }

    #[tokio::test]
    async fn versions_are_contiguous_from_one() {
        let db = Db::open_in_memory().await.unwrap();
        let project = seed_project(&db).await;

        for (i, tag) in ["a", "b", "c"].iter().enumerate() {
            let (b, bytes) = bundle(tag);
            let outcome = db
                .create_policy(project, b, bytes, None, None)
                .await
                .unwrap();
            match outcome {
                PolicyCreate::Created(p) => assert_eq!(p.version, i as i64 + 1),
                other => panic!("expected created: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn identical_bundle_is_unchanged() {
        let db = Db::open_in_memory().await.unwrap();
        let project = seed_project(&db).await;
        let (b, bytes) = bundle("a");
        let first = match db
            .create_policy(project, b.clone(), bytes.clone(), None, None)
            .await
            .unwrap()
        {
            PolicyCreate::Created(p) => p,
            other => panic!("expected created: {other:?}"),
        };

        match db.create_policy(project, b, bytes, None, None).await.unwrap() {
            PolicyCreate::Unchanged(p) => {
                assert_eq!(p.id, first.id);
                assert_eq!(p.version, 1);
            }
            other => panic!("expected unchanged: {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_mismatch_conflicts() {
        let db = Db::open_in_memory().await.unwrap();
        let project = seed_project(&db).await;

        let (b1, bytes1) = bundle("v1");
        let p1 = match db.create_policy(project, b1, bytes1, None, None).await.unwrap() {
            PolicyCreate::Created(p) => p,
            other => panic!("{other:?}"),
        };
        db.activate_policy(project, p1.id).await.unwrap().unwrap();

        // First racer wins with base = p1.
        let (b2, bytes2) = bundle("v2");
        let p2 = match db
            .create_policy(project, b2, bytes2, Some(p1.id), None)
            .await
            .unwrap()
        {
            PolicyCreate::Created(p) => p,
            other => panic!("{other:?}"),
        };
        assert_eq!(p2.version, 2);
        db.activate_policy(project, p2.id).await.unwrap().unwrap();

        // Second racer still based on p1 loses.
        let (b3, bytes3) = bundle("v3");
        match db
            .create_policy(project, b3, bytes3, Some(p1.id), None)
            .await
            .unwrap()
        {
            PolicyCreate::BaseMismatch { active_policy_id } => {
                assert_eq!(active_policy_id, Some(p2.id));
            }
            other => panic!("expected mismatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn activation_requires_same_project() {
        let db = Db::open_in_memory().await.unwrap();
        let project = seed_project(&db).await;
        let other = seed_other_project(&db).await;

        let (b, bytes) = bundle("a");
        let p = match db.create_policy(project, b, bytes, None, None).await.unwrap() {
            PolicyCreate::Created(p) => p,
            other => panic!("{other:?}"),
        };
        assert!(db.activate_policy(other, p.id).await.unwrap().is_none());
        assert!(db.active_policy(other).await.unwrap().is_none());
    }

    async fn seed_other_project(db: &Db) -> Uuid {
        let project_id = Uuid::new_v4();
        db.call({
            let pid = project_id.to_string();
            move |conn| {
                let now = db::ts(Utc::now());
                conn.execute(
                    "INSERT INTO domain_projects (id, slug, visibility, created_at, updated_at)
                     VALUES (?1, 'other', 'private', ?2, ?2)",
                    params![pid, now],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();
        project_id
    }
}
