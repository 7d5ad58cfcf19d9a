use chrono::Utc;
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{
    PresenceState, Project, Repo, Workspace, WorkspaceKind,
};
use bh_core::{origin, validate};
use bh_ephemeral::Ephemeral;
use bh_store::{Db, InitBootstrap, InitOutcome, WorkspacePatch};

use crate::keys;

/// How many `alias-N` suggestions the bootstrap tries before giving up.
const ALIAS_SUGGESTIONS: usize = 8;

/// Workspace lifecycle: the atomic `/v1/init` bootstrap, registration of
/// additional workspaces, patching, soft delete and restore, presence-merged
/// listings.
#[derive(Clone)]
pub struct WorkspaceRegistry {
    db: Db,
    eph: Ephemeral,
}

#[derive(Debug, Clone)]
pub struct InitRequest {
    pub project_slug: String,
    pub tenant_id: Option<String>,
    pub repo_origin: Option<String>,
    pub kind: WorkspaceKind,
    pub alias: String,
    /// When set, alias collisions fall through to `alias-2`, `alias-3`, ...
    pub auto_suggest_alias: bool,
    pub human_name: Option<String>,
    pub role: Option<String>,
    pub timezone: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug)]
pub struct InitResponse {
    pub project: Project,
    pub repo: Option<Repo>,
    pub workspace: Workspace,
    /// Plaintext key, surfaced exactly once.
    pub api_key: String,
}

impl WorkspaceRegistry {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self { db, eph }
    }

    /// The whole bootstrap path: validate, canonicalise, mint, create.
    pub async fn init(&self, req: InitRequest) -> Result<InitResponse> {
        validate::validate_alias(&req.alias)?;
        if let Some(role) = &req.role {
            validate::validate_role(role)?;
        }
        if req.kind == WorkspaceKind::Agent && req.repo_origin.is_none() {
            return Err(Error::Validation(
                "agent workspaces require a repo origin".into(),
            ));
        }

        let canonical_origin = req
            .repo_origin
            .as_deref()
            .map(origin::canonicalize)
            .transpose()?;

        let mut alias_candidates = vec![req.alias.clone()];
        if req.auto_suggest_alias {
            for n in 2..2 + ALIAS_SUGGESTIONS {
                alias_candidates.push(format!("{}-{n}", req.alias));
            }
        }

        let api_key = keys::mint_key();
        let bootstrap = InitBootstrap {
            project_slug: req.project_slug,
            tenant_id: req.tenant_id,
            canonical_origin,
            kind: req.kind,
            alias_candidates,
            human_name: req.human_name,
            role: req.role,
            timezone: req.timezone,
            host: req.host,
            path: req.path,
            workspace_id: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            api_key_hash: keys::hash_key(&api_key),
        };

        match self.db.init_bootstrap(bootstrap).await? {
            InitOutcome::Created {
                project,
                repo,
                workspace,
            } => {
                let now = Utc::now();
                self.eph.presence.touch(project.id, workspace.id, now);
                self.eph.bus.publish(
                    Event::new(EventType::WorkspaceRegistered, project.id, &project.slug)
                        .workspace(workspace.id, &workspace.alias)
                        .human_name(workspace.human_name.clone()),
                );
                tracing::info!(
                    project_id = %project.id,
                    workspace_id = %workspace.id,
                    alias = %workspace.alias,
                    "workspace registered"
                );
                Ok(InitResponse {
                    project,
                    repo,
                    workspace,
                    api_key,
                })
            }
            InitOutcome::AliasTaken => {
                Err(Error::conflict("alias is taken by an active workspace"))
            }
            InitOutcome::OriginBoundElsewhere { other_project_slug } => {
                Err(Error::conflict(format!(
                    "repo origin is already bound to project {other_project_slug}"
                )))
            }
        }
    }

    pub async fn get(&self, workspace_id: Uuid) -> Result<Workspace> {
        self.db
            .workspace_by_id(workspace_id)
            .await?
            .ok_or_else(|| Error::NotFound("workspace not found".into()))
    }

    /// Patch mutable fields. Attempts to change immutable bindings are
    /// rejected before they reach the store.
    pub async fn update(&self, workspace_id: Uuid, patch: WorkspacePatch) -> Result<Workspace> {
        if let Some(Some(role)) = &patch.role {
            validate::validate_role(role)?;
        }
        self.db
            .update_workspace(workspace_id, patch)
            .await?
            .ok_or_else(|| Error::NotFound("workspace not found".into()))
    }

    pub async fn soft_delete(&self, workspace_id: Uuid) -> Result<()> {
        let workspace = self.get(workspace_id).await?;
        if !self.db.soft_delete_workspace(workspace_id).await? {
            return Err(Error::NotFound("workspace not found".into()));
        }
        self.eph.bus.publish(
            Event::new(
                EventType::WorkspaceDeleted,
                workspace.project_id,
                self.project_slug(workspace.project_id).await?,
            )
            .workspace(workspace.id, &workspace.alias),
        );
        Ok(())
    }

    /// Restore preserves the original bindings; fails with `conflict` when
    /// the alias has been taken while the workspace was deleted.
    pub async fn restore(&self, workspace_id: Uuid) -> Result<Workspace> {
        match self.db.restore_workspace(workspace_id).await {
            Ok(Some(workspace)) => Ok(workspace),
            Ok(None) => Err(Error::NotFound(
                "workspace not found or not deleted".into(),
            )),
            Err(err) if err.is_constraint() => Err(Error::conflict(
                "alias was reused while the workspace was deleted",
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Active workspaces with their presence classification merged in.
    pub async fn list_with_presence(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<(Workspace, PresenceState)>> {
        let workspaces = self.db.workspaces_for_project(project_id, false).await?;
        let now = Utc::now();
        Ok(workspaces
            .into_iter()
            .map(|ws| {
                let state = self.eph.presence.state(ws.id, now);
                (ws, state)
            })
            .collect())
    }

    /// Record a sighting in both stores: durable for recovery, ephemeral for
    /// O(1) status listings.
    pub async fn touch(&self, project_id: Uuid, workspace_id: Uuid) -> Result<()> {
        let now = bh_core::types::round_to_micros(Utc::now());
        self.db.touch_last_seen(workspace_id, now).await?;
        self.eph.presence.touch(project_id, workspace_id, now);
        Ok(())
    }

    /// Reseed the presence cache from durable state (ephemeral wipe
    /// recovery).
    pub async fn rebuild_presence(&self, project_id: Uuid) -> Result<()> {
        let seen = self.db.last_seen_snapshot(project_id).await?;
        self.eph.presence.rebuild(project_id, seen);
        Ok(())
    }

    async fn project_slug(&self, project_id: Uuid) -> Result<String> {
        Ok(self
            .db
            .project_by_id(project_id)
            .await?
            .map(|p| p.slug)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry(db: Db) -> WorkspaceRegistry {
        WorkspaceRegistry::new(
            db,
            Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300)),
        )
    }

    fn init_request(alias: &str) -> InitRequest {
        InitRequest {
            project_slug: "demo".into(),
            tenant_id: None,
            repo_origin: Some("git@github.com:acme/widgets.git".into()),
            kind: WorkspaceKind::Agent,
            alias: alias.into(),
            auto_suggest_alias: false,
            human_name: Some("Alice".into()),
            role: Some("implementer".into()),
            timezone: None,
            host: None,
            path: None,
        }
    }

    #[tokio::test]
    async fn init_returns_plaintext_key_once() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db.clone());

        let resp = registry.init(init_request("alice")).await.unwrap();
        assert!(resp.api_key.starts_with("aw_sk_"));
        assert_eq!(
            resp.repo.unwrap().canonical_origin,
            "github.com/acme/widgets"
        );

        // Only the hash is stored; the plaintext resolves through it.
        let resolved = db
            .api_key_by_hash(keys::hash_key(&resp.api_key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.agent_id, Some(resp.workspace.id));
    }

    #[tokio::test]
    async fn alias_conflict_without_suggestion_is_409() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db);
        registry.init(init_request("alice")).await.unwrap();

        let err = registry.init(init_request("alice")).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn alias_conflict_with_suggestion_picks_next() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db);
        registry.init(init_request("alice")).await.unwrap();

        let mut req = init_request("alice");
        req.auto_suggest_alias = true;
        let resp = registry.init(req).await.unwrap();
        assert_eq!(resp.workspace.alias, "alice-2");
    }

    #[tokio::test]
    async fn agent_requires_repo_origin() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db);
        let mut req = init_request("alice");
        req.repo_origin = None;
        let err = registry.init(req).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn dashboard_needs_no_repo() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db);
        let mut req = init_request("ops-dash");
        req.repo_origin = None;
        req.kind = WorkspaceKind::Dashboard;
        let resp = registry.init(req).await.unwrap();
        assert!(resp.repo.is_none());
        assert!(resp.workspace.repo_id.is_none());
    }

    #[tokio::test]
    async fn restore_conflict_when_alias_reused() {
        let db = Db::open_in_memory().await.unwrap();
        let registry = registry(db);
        let first = registry.init(init_request("alice")).await.unwrap();
        registry.soft_delete(first.workspace.id).await.unwrap();
        registry.init(init_request("alice")).await.unwrap();

        let err = registry.restore(first.workspace.id).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }
}
