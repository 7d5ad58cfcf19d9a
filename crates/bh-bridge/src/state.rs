use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use bh_core::config::Config;
use bh_core::error::{Error, Result};
use bh_core::types::Project;
use bh_engine::claims::ClaimEngine;
use bh_engine::escalation::EscalationEngine;
use bh_engine::policy::PolicyEngine;
use bh_engine::registry::WorkspaceRegistry;
use bh_engine::sync::SyncEngine;
use bh_ephemeral::Ephemeral;
use bh_messaging::{ChatPlane, MailPlane};
use bh_store::Db;

/// Shared application state for all HTTP handlers. Built once at startup;
/// no process-wide globals beyond logging.
pub struct ApiState {
    pub config: Config,
    pub db: Db,
    pub eph: Ephemeral,
    pub registry: WorkspaceRegistry,
    pub claims: ClaimEngine,
    pub sync: SyncEngine,
    pub policies: PolicyEngine,
    pub escalations: EscalationEngine,
    pub mail: MailPlane,
    pub chat: ChatPlane,
    /// Set while draining; health reports 503 and new work is refused.
    draining: AtomicBool,
    pub start_time: std::time::Instant,
}

impl ApiState {
    pub fn new(config: Config, db: Db) -> Result<Self> {
        let eph = Ephemeral::new(config.presence_ttl, config.reservation_ttl);
        let policies = PolicyEngine::new(
            db.clone(),
            eph.clone(),
            config.policy_asset_dir.clone(),
        )?;
        Ok(Self {
            registry: WorkspaceRegistry::new(db.clone(), eph.clone()),
            claims: ClaimEngine::new(db.clone(), eph.clone()),
            sync: SyncEngine::new(db.clone(), eph.clone()),
            escalations: EscalationEngine::new(db.clone(), eph.clone()),
            mail: MailPlane::new(db.clone(), eph.clone()),
            chat: ChatPlane::new(db.clone(), eph.clone()),
            policies,
            config,
            db,
            eph,
            draining: AtomicBool::new(false),
            start_time: std::time::Instant::now(),
        })
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Load an active project or fail with `not_found`.
    pub async fn project(&self, project_id: Uuid) -> Result<Project> {
        match self.db.project_by_id(project_id).await? {
            Some(project) if project.deleted_at.is_none() => Ok(project),
            _ => Err(Error::NotFound("project not found".into())),
        }
    }
}
