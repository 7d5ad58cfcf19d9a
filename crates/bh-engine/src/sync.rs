use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::event::{Event, EventType};
use bh_core::types::{round_to_micros, BeadRef, Workspace};
use bh_core::validate;
use bh_ephemeral::Ephemeral;
use bh_store::{ClaimReconcile, ClaimSnapshotEntry, Db, IssueUpsert, SyncApply};

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A bead reference on the wire: either a bare bead id or a full tuple.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefSpec {
    Tuple {
        #[serde(default)]
        repo: Option<String>,
        #[serde(default)]
        branch: Option<String>,
        bead_id: String,
    },
    Bare(String),
}

impl RefSpec {
    fn into_ref(self) -> Result<BeadRef> {
        let r = match self {
            RefSpec::Bare(bead_id) => BeadRef::local(bead_id),
            RefSpec::Tuple {
                repo,
                branch,
                bead_id,
            } => BeadRef {
                repo,
                branch,
                bead_id,
            },
        };
        validate::validate_bead_id(&r.bead_id)
            .map_err(|_| Error::Validation(format!("malformed bead reference {:?}", r.bead_id)))?;
        Ok(r)
    }
}

/// One issue record pushed by the client, either as a JSONL line or an entry
/// in `changed_issues`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncIssueRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "description")]
    pub body: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent: Option<RefSpec>,
    #[serde(default)]
    pub blocked_by: Vec<RefSpec>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimSnapshotRecord {
    #[serde(alias = "bead")]
    pub bead_id: String,
    #[serde(default)]
    pub apex: Option<RefSpec>,
}

/// Counts returned to the client.
#[derive(Debug, serde::Serialize, Default)]
pub struct SyncCounts {
    pub upserts: u64,
    pub deletes: u64,
    pub status_changes: u64,
    pub notifications_queued: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The issue-sync engine: parse the client push, apply it in one transaction,
/// publish the resulting events.
///
/// Syncs are serialised per workspace through an async mutex map; distinct
/// workspaces interleave freely.
#[derive(Clone)]
pub struct SyncEngine {
    db: Db,
    eph: Ephemeral,
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(db: Db, eph: Ephemeral) -> Self {
        Self {
            db,
            eph,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Parse `issues_jsonl` and/or `changed_issues` into validated upserts.
    pub fn parse_records(
        issues_jsonl: Option<&str>,
        changed_issues: Vec<SyncIssueRecord>,
    ) -> Result<Vec<IssueUpsert>> {
        let mut records = Vec::new();
        if let Some(jsonl) = issues_jsonl {
            for (lineno, line) in jsonl.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record: SyncIssueRecord = serde_json::from_str(line).map_err(|e| {
                    Error::Validation(format!("issues_jsonl line {}: {e}", lineno + 1))
                })?;
                records.push(record);
            }
        }
        records.extend(changed_issues);
        records.into_iter().map(Self::normalise).collect()
    }

    /// NFC-normalise and trim strings, round timestamps to microseconds,
    /// validate references.
    fn normalise(record: SyncIssueRecord) -> Result<IssueUpsert> {
        validate::validate_bead_id(&record.id)?;
        let now = round_to_micros(Utc::now());
        let title = validate::nfc_trim(record.title.as_deref().unwrap_or(&record.id));
        let title = if title.is_empty() {
            record.id.clone()
        } else {
            title
        };
        let status = validate::nfc_trim(
            record
                .status
                .as_deref()
                .unwrap_or(bh_core::types::status::OPEN),
        );

        Ok(IssueUpsert {
            bead_id: record.id,
            title,
            body: record.body.map(|b| validate::nfc_trim(&b)),
            status,
            priority: record.priority.unwrap_or(0),
            assignee: record.assignee.map(|a| validate::nfc_trim(&a)),
            creator: record.creator.map(|c| validate::nfc_trim(&c)),
            labels: record
                .labels
                .into_iter()
                .map(|l| validate::nfc_trim(&l))
                .collect(),
            parent: record.parent.map(RefSpec::into_ref).transpose()?,
            blocked_by: record
                .blocked_by
                .into_iter()
                .map(RefSpec::into_ref)
                .collect::<Result<Vec<_>>>()?,
            created_at: round_to_micros(record.created_at.unwrap_or(now)),
            updated_at: round_to_micros(record.updated_at.unwrap_or(now)),
        })
    }

    /// Run one sync for a workspace.
    #[allow(clippy::too_many_arguments)]
    pub async fn sync(
        &self,
        project_slug: &str,
        workspace: &Workspace,
        repo_origin: Option<String>,
        upserts: Vec<IssueUpsert>,
        deleted_ids: Vec<String>,
        claims_snapshot: Option<Vec<ClaimSnapshotRecord>>,
        notifications_ack: Vec<Uuid>,
    ) -> Result<SyncCounts> {
        for bead_id in &deleted_ids {
            validate::validate_bead_id(bead_id)?;
        }
        let claims_snapshot = match claims_snapshot {
            None => None,
            Some(entries) => Some(ClaimReconcile {
                entries: entries
                    .into_iter()
                    .map(|e| {
                        validate::validate_bead_id(&e.bead_id)?;
                        Ok(ClaimSnapshotEntry {
                            bead_id: e.bead_id,
                            apex: e.apex.map(RefSpec::into_ref).transpose()?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
        };

        // One in-flight sync per workspace.
        let lock = self
            .locks
            .entry(workspace.id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = self
            .db
            .sync_apply(SyncApply {
                project_id: workspace.project_id,
                workspace_id: workspace.id,
                workspace_alias: workspace.alias.clone(),
                workspace_human_name: workspace.human_name.clone(),
                repo: repo_origin.clone(),
                upserts,
                deleted_ids,
                claims_snapshot,
            })
            .await?;

        for ack_id in notifications_ack {
            // Best-effort: unknown ids are ignored, matching at-least-once
            // delivery semantics.
            let _ = self
                .db
                .acknowledge_mail(workspace.project_id, ack_id, workspace.id)
                .await?;
        }

        for change in &result.status_changes {
            self.eph.bus.publish(
                Event::new(
                    EventType::BeadStatusChanged,
                    workspace.project_id,
                    project_slug,
                )
                .workspace(workspace.id, &workspace.alias)
                .human_name(workspace.human_name.clone())
                .repo(repo_origin.clone())
                .data(serde_json::json!({
                    "bead_id": change.bead_id,
                    "old_status": change.old_status,
                    "new_status": change.new_status,
                })),
            );
        }
        for bead_id in &result.claims_added {
            self.eph.bus.publish(
                Event::new(EventType::BeadClaimed, workspace.project_id, project_slug)
                    .workspace(workspace.id, &workspace.alias)
                    .data(serde_json::json!({ "bead_id": bead_id, "via": "sync" })),
            );
        }
        for bead_id in &result.claims_removed {
            self.eph.bus.publish(
                Event::new(EventType::BeadUnclaimed, workspace.project_id, project_slug)
                    .workspace(workspace.id, &workspace.alias)
                    .data(serde_json::json!({ "bead_id": bead_id, "via": "sync" })),
            );
        }
        self.eph.bus.publish(
            Event::new(EventType::SyncCompleted, workspace.project_id, project_slug)
                .workspace(workspace.id, &workspace.alias)
                .data(serde_json::json!({
                    "upserts": result.upserts,
                    "deletes": result.deletes,
                    "status_changes": result.status_changes.len(),
                })),
        );

        tracing::info!(
            project_id = %workspace.project_id,
            workspace_id = %workspace.id,
            upserts = result.upserts,
            deletes = result.deletes,
            status_changes = result.status_changes.len(),
            notifications_queued = result.notifications_queued,
            "sync applied"
        );

        Ok(SyncCounts {
            upserts: result.upserts,
            deletes: result.deletes,
            status_changes: result.status_changes.len() as u64,
            notifications_queued: result.notifications_queued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::WorkspaceKind;
    use std::time::Duration;

    fn workspace(project: Uuid) -> Workspace {
        let now = Utc::now();
        Workspace {
            id: Uuid::new_v4(),
            project_id: project,
            repo_id: None,
            kind: WorkspaceKind::Agent,
            alias: "alice".into(),
            human_name: None,
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

    async fn engine() -> SyncEngine {
        SyncEngine::new(
            Db::open_in_memory().await.unwrap(),
            Ephemeral::new(Duration::from_secs(1800), Duration::from_secs(300)),
        )
    }

    #[test]
    fn parse_jsonl_and_structured_together() {
        let jsonl = r#"{"id":"bd-1","title":"first","status":"open"}
{"id":"bd-2","status":"closed","labels":["infra"]}"#;
        let structured = vec![serde_json::from_value::<SyncIssueRecord>(
            serde_json::json!({"id":"bd-3","parent":{"bead_id":"bd-1"}}),
        )
        .unwrap()];

        let records = SyncEngine::parse_records(Some(jsonl), structured).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].title, "first");
        assert_eq!(records[1].labels, vec!["infra".to_string()]);
        assert_eq!(records[2].parent.as_ref().unwrap().bead_id, "bd-1");
    }

    #[test]
    fn parse_rejects_bad_json_line() {
        let err = SyncEngine::parse_records(Some("{not json}"), vec![]).unwrap_err();
        assert_eq!(err.code(), "validation");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn parse_rejects_malformed_tuple() {
        let structured = vec![serde_json::from_value::<SyncIssueRecord>(
            serde_json::json!({"id":"bd-1","blocked_by":[{"bead_id":""}]}),
        )
        .unwrap()];
        let err = SyncEngine::parse_records(None, structured).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn normalise_applies_nfc_and_defaults() {
        let record: SyncIssueRecord =
            serde_json::from_value(serde_json::json!({"id":"bd-1","title":"  cafe\u{0301}  "}))
                .unwrap();
        let upsert = SyncEngine::normalise(record).unwrap();
        assert_eq!(upsert.title, "caf\u{00e9}");
        assert_eq!(upsert.status, "open");
        assert_eq!(upsert.priority, 0);
    }

    #[tokio::test]
    async fn sync_reports_counts_and_reconciles_claims() {
        let engine = engine().await;
        let ws = workspace(Uuid::new_v4());

        let records = SyncEngine::parse_records(
            Some(r#"{"id":"bd-12","status":"open"}"#),
            vec![],
        )
        .unwrap();
        let counts = engine
            .sync(
                "demo",
                &ws,
                None,
                records,
                vec![],
                Some(vec![ClaimSnapshotRecord {
                    bead_id: "bd-12".into(),
                    apex: None,
                }]),
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(counts.upserts, 1);
        assert_eq!(counts.status_changes, 0);

        // Empty snapshot removes the claim again.
        let counts = engine
            .sync("demo", &ws, None, vec![], vec![], Some(vec![]), vec![])
            .await
            .unwrap();
        assert_eq!(counts.upserts, 0);
        let claims = engine.db.claims_for_project(ws.project_id).await.unwrap();
        assert!(claims.is_empty());
    }

    #[tokio::test]
    async fn status_change_publishes_event() {
        let engine = engine().await;
        let ws = workspace(Uuid::new_v4());
        let sub = engine.eph.bus.subscribe(ws.project_id);

        for status in ["open", "in_progress"] {
            let records = SyncEngine::parse_records(
                Some(&format!(r#"{{"id":"bd-42","status":"{status}"}}"#)),
                vec![],
            )
            .unwrap();
            engine
                .sync("demo", &ws, None, records, vec![], None, vec![])
                .await
                .unwrap();
        }

        let events: Vec<_> = std::iter::from_fn(|| sub.rx.try_recv().ok()).collect();
        let change = events
            .iter()
            .find(|e| e.event_type == EventType::BeadStatusChanged)
            .expect("expected a status-change event");
        assert_eq!(change.data["old_status"], "open");
        assert_eq!(change.data["new_status"], "in_progress");
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::SyncCompleted));
    }
}
