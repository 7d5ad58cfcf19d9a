//! Wire types for the `/v1` HTTP surface.
//!
//! Pure serde definitions shared by the bridge and any Rust client; no IO
//! here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bh_core::types::{BeadRef, MailPriority, PresenceState, Visibility, WorkspaceKind};

pub mod cursor;

// ---------------------------------------------------------------------------
// Shared envelope
// ---------------------------------------------------------------------------

/// Error body: `{detail, code, fields?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

/// Pagination defaults: `limit` 50, max 500.
pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 500;

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Init / workspaces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    pub project_slug: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub repo_origin: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: WorkspaceKind,
    pub alias: String,
    #[serde(default)]
    pub auto_suggest_alias: bool,
    #[serde(default)]
    pub human_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_kind() -> WorkspaceKind {
    WorkspaceKind::Agent
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitResponse {
    pub project_id: Uuid,
    pub project_slug: String,
    pub repo_id: Option<Uuid>,
    pub canonical_origin: Option<String>,
    pub workspace: WorkspaceBody,
    /// Plaintext key; shown exactly once.
    pub api_key: String,
}

/// Workspace as rendered to clients. `human_name` is stripped for public
/// readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceBody {
    pub id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Option<Uuid>,
    pub kind: WorkspaceKind,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<BeadRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceState>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkspaceUpdateRequest {
    // Double-option fields: absent = untouched, null = clear.
    #[serde(default, with = "double_option")]
    pub human_name: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub role: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub current_branch: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub focus: Option<Option<BeadRef>>,
    #[serde(default, with = "double_option")]
    pub host: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub path: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub timezone: Option<Option<String>>,
    // Immutable fields, rejected with 412 when present.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub repo_id: Option<Uuid>,
    #[serde(default)]
    pub kind: Option<WorkspaceKind>,
}

/// `Option<Option<T>>` that distinguishes "absent" from "null".
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Repos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RepoCreateRequest {
    pub origin: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepoBody {
    pub id: Uuid,
    pub project_id: Uuid,
    pub canonical_origin: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync + check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub issues_jsonl: Option<String>,
    #[serde(default)]
    pub changed_issues: Vec<serde_json::Value>,
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    #[serde(default)]
    pub claims_snapshot: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub notifications_ack: Vec<Uuid>,
    /// Required in project-scoped-key mode; otherwise inferred from auth.
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub command: String,
    #[serde(default)]
    pub beads: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub bead_id: String,
    #[serde(default)]
    pub apex: Option<BeadRef>,
    #[serde(default)]
    pub jump_in: bool,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimReleaseRequest {
    pub bead_id: String,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ClaimBody {
    pub bead_id: String,
    pub workspace_id: Uuid,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apex: Option<BeadRef>,
    pub claimed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MailSendRequest {
    pub to_alias: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: MailPriority,
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InboxQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    /// Required with project-scoped keys and dashboard users.
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChatStartRequest {
    pub to_aliases: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub start_conversation: bool,
    /// Seconds to block for a reply; `None` with `wait=false` returns
    /// immediately.
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub wait_seconds: Option<i64>,
    #[serde(default)]
    pub leaving: bool,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSendRequest {
    pub message: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub wait_seconds: Option<i64>,
    #[serde(default)]
    pub start_conversation: bool,
    #[serde(default)]
    pub leaving: bool,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendWaitRequest {
    pub seconds: i64,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub path: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReservationBody {
    pub path: String,
    pub workspace_id: Uuid,
    pub alias: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyCreateRequest {
    pub bundle: bh_core::types::PolicyBundle,
    #[serde(default)]
    pub base_policy_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PolicyCreateResponse {
    pub policy_id: Uuid,
    pub version: i64,
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Escalations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationCreateRequest {
    pub subject: String,
    pub situation: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationRespondRequest {
    pub response: String,
    #[serde(default)]
    pub response_note: Option<String>,
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCreateRequest {
    pub bead_id: String,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

fn default_event_types() -> Vec<String> {
    vec![bh_core::types::EVENT_STATUS_CHANGE.to_string()]
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub project_id: Uuid,
    pub project_slug: String,
    pub visibility: Visibility,
    pub workspaces: Vec<WorkspaceBody>,
    pub claims: Vec<ClaimBody>,
    /// Beads with two or more claimants.
    pub conflicts: Vec<String>,
    pub reservations: Vec<ReservationBody>,
    pub outbox_depth: u64,
}

// ---------------------------------------------------------------------------
// Dashboard bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DashboardConfig {
    pub project_slug: String,
    pub visibility: Visibility,
    pub stream_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardIdentityRequest {
    pub alias: String,
    #[serde(default)]
    pub human_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(100)), 100);
        assert_eq!(clamp_limit(Some(9999)), 500);
    }

    #[test]
    fn update_request_distinguishes_absent_and_null() {
        let absent: WorkspaceUpdateRequest = serde_json::from_str("{}").unwrap();
        assert!(absent.role.is_none());

        let null: WorkspaceUpdateRequest = serde_json::from_str(r#"{"role":null}"#).unwrap();
        assert_eq!(null.role, Some(None));

        let set: WorkspaceUpdateRequest = serde_json::from_str(r#"{"role":"reviewer"}"#).unwrap();
        assert_eq!(set.role, Some(Some("reviewer".into())));
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody {
            detail: "bd-12 is claimed by alice".into(),
            code: Some("conflict".into()),
            fields: Some(serde_json::json!({"claimants": [{"alias": "alice"}]})),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["detail"], "bd-12 is claimed by alice");
        assert_eq!(json["code"], "conflict");
        assert_eq!(json["fields"]["claimants"][0]["alias"], "alice");
    }
}
