use std::path::PathBuf;
use std::sync::RwLock;

use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::policy as policy_assets;
use bh_core::types::{Policy, PolicyBundle};
use bh_ephemeral::Ephemeral;
use bh_store::{Db, PolicyCreate};

/// Versioned policy bundles: atomic version allocation with optimistic
/// concurrency, the activation pointer, and defaults reset from the bundled
/// assets.
pub struct PolicyEngine {
    db: Db,
    eph: Ephemeral,
    asset_dir: Option<PathBuf>,
    /// Default bundle loaded once at startup; replaced by the reload
    /// endpoint.
    defaults: RwLock<PolicyBundle>,
}

#[derive(Debug)]
pub struct CreateResult {
    pub policy: Policy,
    pub created: bool,
}

impl PolicyEngine {
    pub fn new(db: Db, eph: Ephemeral, asset_dir: Option<PathBuf>) -> Result<Self> {
        let defaults = policy_assets::load_defaults(asset_dir.as_deref())?;
        Ok(Self {
            db,
            eph,
            asset_dir,
            defaults: RwLock::new(defaults),
        })
    }

    pub async fn get_active(&self, project_id: Uuid) -> Result<Option<Policy>> {
        Ok(self.db.active_policy(project_id).await?)
    }

    pub async fn get_by_id(&self, project_id: Uuid, policy_id: Uuid) -> Result<Policy> {
        self.db
            .policy_by_id(project_id, policy_id)
            .await?
            .ok_or_else(|| Error::NotFound("policy not found".into()))
    }

    pub async fn list_history(&self, project_id: Uuid, limit: u32) -> Result<Vec<Policy>> {
        Ok(self.db.policy_history(project_id, limit).await?)
    }

    /// Create a new version. With `base_policy_id`, the call fails with
    /// `conflict` unless that id is still the active policy at commit time.
    /// An identical bundle returns the existing row with `created: false`.
    pub async fn create(
        &self,
        project_id: Uuid,
        bundle: PolicyBundle,
        base_policy_id: Option<Uuid>,
        created_by: Option<Uuid>,
    ) -> Result<CreateResult> {
        let bytes = policy_assets::canonical_bytes(&bundle)?;
        match self
            .db
            .create_policy(project_id, bundle, bytes, base_policy_id, created_by)
            .await?
        {
            PolicyCreate::Created(policy) => Ok(CreateResult {
                policy,
                created: true,
            }),
            PolicyCreate::Unchanged(policy) => Ok(CreateResult {
                policy,
                created: false,
            }),
            PolicyCreate::BaseMismatch { active_policy_id } => Err(Error::conflict_with(
                "base_policy_id does not match the active policy",
                serde_json::json!({ "active_policy_id": active_policy_id }),
            )),
            PolicyCreate::ProjectNotFound => Err(Error::NotFound("project not found".into())),
        }
    }

    pub async fn activate(
        &self,
        project_id: Uuid,
        project_slug: &str,
        policy_id: Uuid,
    ) -> Result<Policy> {
        let policy = self
            .db
            .activate_policy(project_id, policy_id)
            .await?
            .ok_or_else(|| Error::NotFound("policy not found in this project".into()))?;
        self.eph.bus.publish(
            Event::new(EventType::PolicyActivated, project_id, project_slug).data(
                serde_json::json!({ "policy_id": policy.id, "version": policy.version }),
            ),
        );
        Ok(policy)
    }

    /// Create a new version from the current default snapshot and activate
    /// it.
    pub async fn reset_to_defaults(
        &self,
        project_id: Uuid,
        project_slug: &str,
        created_by: Option<Uuid>,
    ) -> Result<Policy> {
        let bundle = self
            .defaults
            .read()
            .expect("policy defaults lock poisoned")
            .clone();
        let result = self.create(project_id, bundle, None, created_by).await?;
        self.activate(project_id, project_slug, result.policy.id)
            .await
    }

    /// Re-read the default assets from disk (hot reload).
    pub fn reload_defaults(&self) -> Result<()> {
        let fresh = policy_assets::load_defaults(self.asset_dir.as_deref())?;
        *self
            .defaults
            .write()
            .expect("policy defaults lock poisoned") = fresh;
        tracing::info!("policy defaults reloaded");
        Ok(())
    }

    pub fn defaults_snapshot(&self) -> PolicyBundle {
        self.defaults
            .read()
            .expect("policy defaults lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::PolicyInvariant;
    use std::time::Duration;

    async fn engine() -> (PolicyEngine, Uuid) {
        let db = Db::open_in_memory().await.unwrap();
        let eph = Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300));
        // Seed a project through the bootstrap path.
        let outcome = db
            .init_bootstrap(bh_store::InitBootstrap {
                project_slug: "demo".into(),
                tenant_id: None,
                canonical_origin: Some("github.com/acme/widgets".into()),
                kind: bh_core::types::WorkspaceKind::Agent,
                alias_candidates: vec!["alice".into()],
                human_name: None,
                role: None,
                timezone: None,
                host: None,
                path: None,
                workspace_id: Uuid::new_v4(),
                api_key_id: Uuid::new_v4(),
                api_key_hash: "h".into(),
            })
            .await
            .unwrap();
        let project_id = match outcome {
            bh_store::InitOutcome::Created { project, .. } => project.id,
            other => panic!("{other:?}"),
        };
        (PolicyEngine::new(db, eph, None).unwrap(), project_id)
    }

    fn bundle(tag: &str) -> PolicyBundle {
        PolicyBundle {
            invariants: vec![PolicyInvariant {
                id: tag.into(),
                title: "t".into(),
                body: "b".into(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_identical_bundle() {
        let (engine, project) = engine().await;
        let first = engine
            .create(project, bundle("a"), None, None)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.policy.version, 1);

        let second = engine
            .create(project, bundle("a"), None, None)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.policy.id, first.policy.id);
    }

    #[tokio::test]
    async fn optimistic_concurrency_on_base_policy() {
        let (engine, project) = engine().await;
        let p7 = engine
            .create(project, bundle("v7"), None, None)
            .await
            .unwrap()
            .policy;
        engine.activate(project, "demo", p7.id).await.unwrap();

        let winner = engine
            .create(project, bundle("v8"), Some(p7.id), None)
            .await
            .unwrap();
        assert!(winner.created);
        assert_eq!(winner.policy.version, 2);
        engine
            .activate(project, "demo", winner.policy.id)
            .await
            .unwrap();

        let loser = engine
            .create(project, bundle("v8-race"), Some(p7.id), None)
            .await
            .unwrap_err();
        assert_eq!(loser.code(), "conflict");
    }

    #[tokio::test]
    async fn reset_creates_and_activates_default_snapshot() {
        let (engine, project) = engine().await;
        let policy = engine
            .reset_to_defaults(project, "demo", None)
            .await
            .unwrap();
        assert_eq!(policy.version, 1);

        let active = engine.get_active(project).await.unwrap().unwrap();
        assert_eq!(active.id, policy.id);
        assert_eq!(active.bundle, engine.defaults_snapshot());
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (engine, project) = engine().await;
        for tag in ["a", "b", "c"] {
            engine.create(project, bundle(tag), None, None).await.unwrap();
        }
        let history = engine.list_history(project, 10).await.unwrap();
        let versions: Vec<i64> = history.iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }
}
