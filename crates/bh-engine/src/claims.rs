use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{BeadRef, Claim, Workspace};
use bh_core::validate;
use bh_ephemeral::Ephemeral;
use bh_store::{AcquireOutcome, Db};

/// Per-bead verdict from the destructive-command pre-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckVerdict {
    Allow,
    Warn,
    Reject,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    /// The bead id or file path the verdict is about.
    pub target: String,
    pub verdict: CheckVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Claim acquisition and release, plus the pre-flight check used before
/// destructive client commands.
#[derive(Clone)]
pub struct ClaimEngine {
    db: Db,
    eph: Ephemeral,
}

impl ClaimEngine {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self { db, eph }
    }

    /// Acquire a claim. Without `jump_in`, an existing claimant produces a
    /// structured conflict naming them so the caller can surface
    /// "blocked by alice".
    pub async fn claim(
        &self,
        project_slug: &str,
        workspace: &Workspace,
        bead_id: String,
        apex: Option<BeadRef>,
        jump_in: bool,
    ) -> Result<Claim> {
        validate::validate_bead_id(&bead_id)?;

        let outcome = self
            .db
            .acquire_claim(
                workspace.project_id,
                bead_id.clone(),
                workspace.id,
                workspace.alias.clone(),
                workspace.human_name.clone(),
                apex,
                jump_in,
            )
            .await?;

        match outcome {
            AcquireOutcome::Acquired(claim) => {
                self.eph.bus.publish(
                    Event::new(EventType::BeadClaimed, workspace.project_id, project_slug)
                        .workspace(workspace.id, &workspace.alias)
                        .human_name(workspace.human_name.clone())
                        .data(serde_json::json!({ "bead_id": claim.bead_id, "jump_in": jump_in })),
                );
                Ok(claim)
            }
            AcquireOutcome::Held(claimants) => {
                let names: Vec<serde_json::Value> = claimants
                    .iter()
                    .map(|c| match &c.human_name {
                        Some(name) => {
                            serde_json::json!({ "alias": c.alias, "human_name": name })
                        }
                        None => serde_json::json!({ "alias": c.alias }),
                    })
                    .collect();
                let holders = claimants
                    .iter()
                    .map(|c| c.alias.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(Error::conflict_with(
                    format!("{bead_id} is claimed by {holders}"),
                    serde_json::json!({ "claimants": names }),
                ))
            }
        }
    }

    /// Release is a no-op when the claim is not held.
    pub async fn release(
        &self,
        project_slug: &str,
        workspace: &Workspace,
        bead_id: String,
    ) -> Result<()> {
        let released = self
            .db
            .release_claim(workspace.project_id, bead_id.clone(), workspace.id)
            .await?;
        if released {
            self.eph.bus.publish(
                Event::new(EventType::BeadUnclaimed, workspace.project_id, project_slug)
                    .workspace(workspace.id, &workspace.alias)
                    .data(serde_json::json!({ "bead_id": bead_id })),
            );
        }
        Ok(())
    }

    pub async fn list(&self, project_id: Uuid) -> Result<Vec<Claim>> {
        Ok(self.db.claims_for_project(project_id).await?)
    }

    /// Beads with two or more active claimants.
    pub async fn conflicts(&self, project_id: Uuid) -> Result<Vec<(String, Vec<Claim>)>> {
        let mut by_bead: std::collections::BTreeMap<String, Vec<Claim>> = Default::default();
        for claim in self.db.claims_for_project(project_id).await? {
            by_bead.entry(claim.bead_id.clone()).or_default().push(claim);
        }
        Ok(by_bead
            .into_iter()
            .filter(|(_, claims)| claims.len() >= 2)
            .collect())
    }

    /// Pre-flight for a proposed client command over a set of beads.
    ///
    /// `allow` when the caller holds the claim (or nobody does and the
    /// command is not destructive), `warn` when another workspace claims the
    /// bead or holds overlapping reservations, `reject` for destructive
    /// commands on beads claimed exclusively by others.
    pub async fn check(
        &self,
        workspace: &Workspace,
        command: &str,
        beads: Vec<String>,
        paths: Vec<String>,
    ) -> Result<Vec<CheckResult>> {
        let destructive = matches!(command, "delete" | "close" | "reassign" | "force-sync");
        let now = Utc::now();
        let mut results = Vec::with_capacity(beads.len());

        for bead_id in beads {
            validate::validate_bead_id(&bead_id)?;
            let claimants = self
                .db
                .claims_for_bead(workspace.project_id, bead_id.clone())
                .await?;
            let ours = claimants.iter().any(|c| c.workspace_id == workspace.id);
            let theirs: Vec<&Claim> = claimants
                .iter()
                .filter(|c| c.workspace_id != workspace.id)
                .collect();

            let (verdict, detail) = if theirs.is_empty() {
                (CheckVerdict::Allow, None)
            } else if ours {
                let holders = theirs.iter().map(|c| c.alias.clone()).collect::<Vec<_>>();
                (
                    CheckVerdict::Warn,
                    Some(format!("also claimed by {}", holders.join(", "))),
                )
            } else if destructive {
                let holders = theirs.iter().map(|c| c.alias.clone()).collect::<Vec<_>>();
                (
                    CheckVerdict::Reject,
                    Some(format!("claimed by {}", holders.join(", "))),
                )
            } else {
                let holders = theirs.iter().map(|c| c.alias.clone()).collect::<Vec<_>>();
                (
                    CheckVerdict::Warn,
                    Some(format!("claimed by {}", holders.join(", "))),
                )
            };
            results.push(CheckResult {
                target: bead_id,
                verdict,
                detail,
            });
        }

        // Reservation overlap never blocks, only warns.
        for path in paths {
            if let Some(holder) = self.eph.reservations.holder(workspace.project_id, &path, now)
            {
                if holder.workspace_id != workspace.id {
                    results.push(CheckResult {
                        target: path,
                        verdict: CheckVerdict::Warn,
                        detail: Some(format!("path reserved by {}", holder.alias)),
                    });
                }
            }
        }

        Ok(results)
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
            human_name: Some(alias.to_uppercase()),
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

    async fn engine() -> ClaimEngine {
        ClaimEngine::new(
            Db::open_in_memory().await.unwrap(),
            Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300)),
        )
    }

    #[tokio::test]
    async fn conflict_carries_claimant_fields() {
        let engine = engine().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        engine
            .claim("demo", &alice, "bd-12".into(), None, false)
            .await
            .unwrap();
        let err = engine
            .claim("demo", &bob, "bd-12".into(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert_eq!(err.to_string(), "bd-12 is claimed by alice");
        match err {
            Error::Conflict { fields, .. } => {
                let fields = fields.unwrap();
                assert_eq!(fields["claimants"][0]["alias"], "alice");
            }
            other => panic!("expected conflict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn jump_in_keeps_both_claimants() {
        let engine = engine().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        engine
            .claim("demo", &alice, "bd-12".into(), None, false)
            .await
            .unwrap();
        engine
            .claim("demo", &bob, "bd-12".into(), None, true)
            .await
            .unwrap();

        let conflicts = engine.conflicts(project).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].0, "bd-12");
        assert_eq!(conflicts[0].1.len(), 2);
    }

    #[tokio::test]
    async fn claim_release_claim_round_trips() {
        let engine = engine().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");

        engine
            .claim("demo", &alice, "bd-1".into(), None, false)
            .await
            .unwrap();
        engine
            .release("demo", &alice, "bd-1".into())
            .await
            .unwrap();
        let again = engine
            .claim("demo", &alice, "bd-1".into(), None, false)
            .await
            .unwrap();
        assert_eq!(again.bead_id, "bd-1");
        assert_eq!(engine.list(project).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_rejects_destructive_on_foreign_claim() {
        let engine = engine().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        engine
            .claim("demo", &alice, "bd-12".into(), None, false)
            .await
            .unwrap();

        let results = engine
            .check(&bob, "delete", vec!["bd-12".into()], vec![])
            .await
            .unwrap();
        assert_eq!(results[0].verdict, CheckVerdict::Reject);

        let results = engine
            .check(&bob, "edit", vec!["bd-12".into()], vec![])
            .await
            .unwrap();
        assert_eq!(results[0].verdict, CheckVerdict::Warn);

        let results = engine
            .check(&alice, "delete", vec!["bd-12".into()], vec![])
            .await
            .unwrap();
        assert_eq!(results[0].verdict, CheckVerdict::Allow);
    }

    #[tokio::test]
    async fn check_warns_on_foreign_reservation() {
        let engine = engine().await;
        let project = Uuid::new_v4();
        let alice = workspace(project, "alice");
        let bob = workspace(project, "bob");

        engine.eph.reservations.reserve(
            project,
            "src/x.py".into(),
            alice.id,
            "alice".into(),
            None,
            Utc::now(),
        );

        let results = engine
            .check(&bob, "edit", vec![], vec!["src/x.py".into()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, CheckVerdict::Warn);
        assert!(results[0].detail.as_deref().unwrap().contains("alice"));
    }
}
