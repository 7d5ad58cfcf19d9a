use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use bh_core::types::{Project, Repo, Visibility, Workspace, WorkspaceId, WorkspaceKind};

use crate::db::{self, Db};
use crate::error::StoreError;
use crate::workspaces;

pub(crate) const PROJECT_COLS: &str =
    "id, tenant_id, slug, visibility, active_policy_id, created_at, updated_at, deleted_at";

pub(crate) fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: parse_uuid(row, 0)?,
        tenant_id: row.get(1)?,
        slug: row.get(2)?,
        visibility: match row.get::<_, String>(3)?.as_str() {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        },
        active_policy_id: parse_uuid_opt(row, 4)?,
        created_at: db::parse_ts(&row.get::<_, String>(5)?)?,
        updated_at: db::parse_ts(&row.get::<_, String>(6)?)?,
        deleted_at: db::parse_ts_opt(row.get(7)?)?,
    })
}

pub(crate) const REPO_COLS: &str = "id, project_id, canonical_origin, created_at, deleted_at";

pub(crate) fn row_to_repo(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: parse_uuid(row, 0)?,
        project_id: parse_uuid(row, 1)?,
        canonical_origin: row.get(2)?,
        created_at: db::parse_ts(&row.get::<_, String>(3)?)?,
        deleted_at: db::parse_ts_opt(row.get(4)?)?,
    })
}

pub(crate) fn parse_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_uuid_opt(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Init bootstrap
// ---------------------------------------------------------------------------

/// Inputs to the atomic `/v1/init` transaction. Ids, key hash, and alias
/// suggestions are prepared by the caller so the store stays crypto-free.
#[derive(Debug, Clone)]
pub struct InitBootstrap {
    pub project_slug: String,
    pub tenant_id: Option<String>,
    pub canonical_origin: Option<String>,
    pub kind: WorkspaceKind,
    /// Tried in order; the first free alias wins.
    pub alias_candidates: Vec<String>,
    pub human_name: Option<String>,
    pub role: Option<String>,
    pub timezone: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    /// Becomes both the agent id and the workspace id.
    pub workspace_id: WorkspaceId,
    pub api_key_id: Uuid,
    pub api_key_hash: String,
}

#[derive(Debug)]
pub enum InitOutcome {
    Created {
        project: Project,
        repo: Option<Repo>,
        workspace: Workspace,
    },
    /// Every candidate alias is held by an active workspace.
    AliasTaken,
    /// The canonical origin is already bound to a different project.
    OriginBoundElsewhere { other_project_slug: String },
}

impl Db {
    /// The whole `/v1/init` path in one transaction: ensure project, ensure
    /// repo, create agent + hashed key, create workspace.
    pub async fn init_bootstrap(&self, input: InitBootstrap) -> Result<InitOutcome, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = db::ts(Utc::now());

            // (a) project by slug, creating when missing.
            let tenant_key = input.tenant_id.clone().unwrap_or_default();
            let project_id: String = match tx
                .query_row(
                    "SELECT id FROM domain_projects
                     WHERE COALESCE(tenant_id, '') = ?1 AND slug = ?2 AND deleted_at IS NULL",
                    params![tenant_key, input.project_slug],
                    |row| row.get(0),
                )
                .optional()?
            {
                Some(id) => id,
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO domain_projects
                             (id, tenant_id, slug, visibility, created_at, updated_at)
                         VALUES (?1, ?2, ?3, 'private', ?4, ?4)",
                        params![id, input.tenant_id, input.project_slug, now],
                    )?;
                    id
                }
            };

            // (b) repo by canonical origin; never re-bound.
            let repo_id: Option<String> = match &input.canonical_origin {
                None => None,
                Some(origin) => {
                    let existing: Option<(String, String)> = tx
                        .query_row(
                            "SELECT id, project_id FROM domain_repos
                             WHERE canonical_origin = ?1 AND deleted_at IS NULL",
                            params![origin],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    match existing {
                        Some((id, bound_project)) if bound_project == project_id => Some(id),
                        Some((_, bound_project)) => {
                            let other_slug: String = tx.query_row(
                                "SELECT slug FROM domain_projects WHERE id = ?1",
                                params![bound_project],
                                |row| row.get(0),
                            )?;
                            return Ok(InitOutcome::OriginBoundElsewhere {
                                other_project_slug: other_slug,
                            });
                        }
                        None => {
                            let id = Uuid::new_v4().to_string();
                            tx.execute(
                                "INSERT INTO domain_repos
                                     (id, project_id, canonical_origin, created_at)
                                 VALUES (?1, ?2, ?3, ?4)",
                                params![id, project_id, origin, now],
                            )?;
                            Some(id)
                        }
                    }
                }
            };

            // (d, part 1) pick the first free alias deterministically.
            let mut chosen_alias: Option<String> = None;
            for candidate in &input.alias_candidates {
                let taken: bool = tx
                    .query_row(
                        "SELECT 1 FROM domain_workspaces
                         WHERE project_id = ?1 AND alias = ?2 AND deleted_at IS NULL",
                        params![project_id, candidate],
                        |_| Ok(true),
                    )
                    .optional()?
                    .unwrap_or(false);
                if !taken {
                    chosen_alias = Some(candidate.clone());
                    break;
                }
            }
            let Some(alias) = chosen_alias else {
                return Ok(InitOutcome::AliasTaken);
            };

            // (c) agent identity + hashed key.
            let ws_id = input.workspace_id.to_string();
            tx.execute(
                "INSERT INTO auth_agents (id, project_id, created_at) VALUES (?1, ?2, ?3)",
                params![ws_id, project_id, now],
            )?;
            tx.execute(
                "INSERT INTO auth_api_keys (id, project_id, agent_id, key_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    input.api_key_id.to_string(),
                    project_id,
                    ws_id,
                    input.api_key_hash,
                    now
                ],
            )?;

            // (d, part 2) the workspace row itself.
            let kind = match input.kind {
                WorkspaceKind::Agent => "agent",
                WorkspaceKind::Dashboard => "dashboard",
            };
            tx.execute(
                "INSERT INTO domain_workspaces
                     (id, project_id, repo_id, kind, alias, human_name, role,
                      timezone, host, path, created_at, updated_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?11)",
                params![
                    ws_id,
                    project_id,
                    repo_id,
                    kind,
                    alias,
                    input.human_name,
                    input.role,
                    input.timezone,
                    input.host,
                    input.path,
                    now
                ],
            )?;

            let project = tx.query_row(
                &format!("SELECT {PROJECT_COLS} FROM domain_projects WHERE id = ?1"),
                params![project_id],
                row_to_project,
            )?;
            let repo = match &repo_id {
                Some(id) => Some(tx.query_row(
                    &format!("SELECT {REPO_COLS} FROM domain_repos WHERE id = ?1"),
                    params![id],
                    row_to_repo,
                )?),
                None => None,
            };
            let workspace = tx.query_row(
                &format!(
                    "SELECT {} FROM domain_workspaces WHERE id = ?1",
                    workspaces::WORKSPACE_COLS
                ),
                params![ws_id],
                workspaces::row_to_workspace,
            )?;

            tx.commit()?;
            Ok(InitOutcome::Created {
                project,
                repo,
                workspace,
            })
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Project reads
    // -----------------------------------------------------------------------

    pub async fn project_by_id(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PROJECT_COLS} FROM domain_projects WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_project,
                )
                .optional()?)
        })
        .await
    }

    pub async fn project_by_slug(
        &self,
        tenant_id: Option<String>,
        slug: String,
    ) -> Result<Option<Project>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {PROJECT_COLS} FROM domain_projects
                         WHERE COALESCE(tenant_id, '') = ?1 AND slug = ?2 AND deleted_at IS NULL"
                    ),
                    params![tenant_id.unwrap_or_default(), slug],
                    row_to_project,
                )
                .optional()?)
        })
        .await
    }

    /// Ids of all active projects (startup presence rebuild).
    pub async fn project_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM domain_projects WHERE deleted_at IS NULL")?;
            let rows = stmt
                .query_map([], |row| parse_uuid(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Flip a project's visibility (admin surface).
    pub async fn set_project_visibility(
        &self,
        project_id: Uuid,
        visibility: Visibility,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let raw = match visibility {
                Visibility::Private => "private",
                Visibility::Public => "public",
            };
            let n = conn.execute(
                "UPDATE domain_projects SET visibility = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![project_id.to_string(), raw, db::ts(Utc::now())],
            )?;
            Ok(n > 0)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Repos
    // -----------------------------------------------------------------------

    pub async fn repos_for_project(&self, project_id: Uuid) -> Result<Vec<Repo>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPO_COLS} FROM domain_repos
                 WHERE project_id = ?1 AND deleted_at IS NULL
                 ORDER BY canonical_origin"
            ))?;
            let rows = stmt
                .query_map(params![project_id.to_string()], row_to_repo)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Ensure a repo row exists for `(project, origin)`. Fails with `None`
    /// when the origin is bound to a different project.
    pub async fn ensure_repo(
        &self,
        project_id: Uuid,
        canonical_origin: String,
    ) -> Result<Option<Repo>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let pid = project_id.to_string();
            let existing: Option<Repo> = tx
                .query_row(
                    &format!(
                        "SELECT {REPO_COLS} FROM domain_repos
                         WHERE canonical_origin = ?1 AND deleted_at IS NULL"
                    ),
                    params![canonical_origin],
                    row_to_repo,
                )
                .optional()?;
            let repo = match existing {
                Some(repo) if repo.project_id == project_id => Some(repo),
                Some(_) => None,
                None => {
                    let id = Uuid::new_v4().to_string();
                    let now = db::ts(Utc::now());
                    tx.execute(
                        "INSERT INTO domain_repos (id, project_id, canonical_origin, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![id, pid, canonical_origin, now],
                    )?;
                    Some(tx.query_row(
                        &format!("SELECT {REPO_COLS} FROM domain_repos WHERE id = ?1"),
                        params![id],
                        row_to_repo,
                    )?)
                }
            };
            tx.commit()?;
            Ok(repo)
        })
        .await
    }

    /// Soft-delete a repo. Repos are never hard-deleted.
    pub async fn soft_delete_repo(
        &self,
        project_id: Uuid,
        repo_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let now = db::ts(Utc::now());
            let n = conn.execute(
                "UPDATE domain_repos SET deleted_at = ?1
                 WHERE id = ?2 AND project_id = ?3 AND deleted_at IS NULL",
                params![now, repo_id.to_string(), project_id.to_string()],
            )?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap_input(slug: &str, alias: &str, origin: &str) -> InitBootstrap {
        InitBootstrap {
            project_slug: slug.into(),
            tenant_id: None,
            canonical_origin: Some(origin.into()),
            kind: WorkspaceKind::Agent,
            alias_candidates: vec![
                alias.to_string(),
                format!("{alias}-2"),
                format!("{alias}-3"),
            ],
            human_name: Some("Alice".into()),
            role: Some("implementer".into()),
            timezone: None,
            host: None,
            path: None,
            workspace_id: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            api_key_hash: format!("hash-{}", Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn bootstrap_creates_project_repo_workspace() {
        let db = Db::open_in_memory().await.unwrap();
        let outcome = db
            .init_bootstrap(bootstrap_input("demo", "alice", "github.com/acme/widgets"))
            .await
            .unwrap();
        match outcome {
            InitOutcome::Created {
                project,
                repo,
                workspace,
            } => {
                assert_eq!(project.slug, "demo");
                assert_eq!(repo.unwrap().canonical_origin, "github.com/acme/widgets");
                assert_eq!(workspace.alias, "alice");
                assert_eq!(workspace.project_id, project.id);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn alias_collision_takes_next_suggestion() {
        let db = Db::open_in_memory().await.unwrap();
        db.init_bootstrap(bootstrap_input("demo", "alice", "github.com/acme/widgets"))
            .await
            .unwrap();
        let outcome = db
            .init_bootstrap(bootstrap_input("demo", "alice", "github.com/acme/widgets"))
            .await
            .unwrap();
        match outcome {
            InitOutcome::Created { workspace, .. } => assert_eq!(workspace.alias, "alice-2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_candidate_collision_is_alias_taken() {
        let db = Db::open_in_memory().await.unwrap();
        db.init_bootstrap(bootstrap_input("demo", "alice", "github.com/acme/widgets"))
            .await
            .unwrap();
        let mut input = bootstrap_input("demo", "alice", "github.com/acme/widgets");
        input.alias_candidates = vec!["alice".into()];
        let outcome = db.init_bootstrap(input).await.unwrap();
        assert!(matches!(outcome, InitOutcome::AliasTaken));
    }

    #[tokio::test]
    async fn origin_is_never_rebound() {
        let db = Db::open_in_memory().await.unwrap();
        db.init_bootstrap(bootstrap_input("demo", "alice", "github.com/acme/widgets"))
            .await
            .unwrap();
        let outcome = db
            .init_bootstrap(bootstrap_input("other", "bob", "github.com/acme/widgets"))
            .await
            .unwrap();
        match outcome {
            InitOutcome::OriginBoundElsewhere { other_project_slug } => {
                assert_eq!(other_project_slug, "demo")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
