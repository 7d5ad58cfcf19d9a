use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = Uuid;
pub type RepoId = Uuid;
/// Equal to the auth-layer agent id; there is no independent mapping.
pub type WorkspaceId = Uuid;

/// Round a timestamp to microsecond precision, the resolution the store keeps.
pub fn round_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond() % 1_000;
    ts - chrono::Duration::nanoseconds(nanos as i64)
}

// ---------------------------------------------------------------------------
// Project / Repo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_id: Option<String>,
    /// Unique among active projects within a tenant (globally when untenanted).
    pub slug: String,
    pub visibility: Visibility,
    pub active_policy_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A git repository, keyed by canonical origin and bound to exactly one
/// project for its whole life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub project_id: ProjectId,
    pub canonical_origin: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    /// A coding agent; requires a repo binding.
    Agent,
    /// A human dashboard identity; no repo.
    Dashboard,
}

/// An agent's identity within a project.
///
/// `project_id`, `repo_id`, `alias`, and `kind` are immutable after creation;
/// the store enforces this with triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub project_id: ProjectId,
    pub repo_id: Option<RepoId>,
    pub kind: WorkspaceKind,
    pub alias: String,
    pub human_name: Option<String>,
    pub role: Option<String>,
    pub current_branch: Option<String>,
    /// The apex bead this workspace is currently working toward.
    pub focus: Option<BeadRef>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Workspace {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Presence derived from `last_seen_at` against the configured TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Active,
    Idle,
    Offline,
}

// ---------------------------------------------------------------------------
// Beads (issues)
// ---------------------------------------------------------------------------

/// Well-known status strings. Clients may define others; anything outside
/// these three is stored verbatim and treated as non-blocking for readiness.
pub mod status {
    pub const OPEN: &str = "open";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const CLOSED: &str = "closed";

    /// A blocker in one of these states keeps dependants not-ready.
    pub fn blocks_ready(status: &str) -> bool {
        status == OPEN || status == IN_PROGRESS
    }
}

/// Reference to a bead, possibly in another repo/branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeadRef {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub bead_id: String,
}

impl BeadRef {
    pub fn local(bead_id: impl Into<String>) -> Self {
        Self {
            repo: None,
            branch: None,
            bead_id: bead_id.into(),
        }
    }
}

/// The server-side mirror of a tracker issue, keyed by `(project, bead_id)`.
/// The client is the authority; the server only indexes what it is pushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub project_id: ProjectId,
    pub bead_id: String,
    pub title: String,
    pub body: Option<String>,
    pub status: String,
    /// Signed; lower value = higher priority.
    pub priority: i64,
    pub assignee: Option<String>,
    pub creator: Option<String>,
    pub labels: Vec<String>,
    pub parent: Option<BeadRef>,
    pub blocked_by: Vec<BeadRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// A workspace's declaration that it is working on a bead. Several workspaces
/// may hold claims on the same bead when they opted into jump-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub project_id: ProjectId,
    pub bead_id: String,
    pub workspace_id: WorkspaceId,
    pub alias: String,
    pub human_name: Option<String>,
    pub apex: Option<BeadRef>,
    pub claimed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

/// Short-lived advisory file lock, scoped per project. Lives in the
/// ephemeral store only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub project_id: ProjectId,
    pub path: String,
    pub workspace_id: WorkspaceId,
    pub alias: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// Subscriptions & notification outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub bead_id: String,
    /// When set, only status changes synced from this repo match.
    pub repo: Option<String>,
    pub event_types: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub const EVENT_STATUS_CHANGE: &str = "status_change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Durable notification envelope, co-committed with the event that produced
/// it and drained asynchronously by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub recipient_workspace_id: WorkspaceId,
    pub recipient_alias: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Content hash the dispatcher and recipients dedupe on.
    pub fingerprint: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub delivered_message_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub actor_workspace_id: Option<WorkspaceId>,
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Escalations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Responded,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub alias: String,
    pub subject: String,
    pub situation: String,
    pub options: Vec<String>,
    pub status: EscalationStatus,
    pub response: Option<String>,
    pub response_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MailPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A durable, read-receipted message between two workspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub from_workspace_id: WorkspaceId,
    pub from_alias: String,
    pub to_workspace_id: WorkspaceId,
    pub subject: String,
    pub body: String,
    pub priority: MailPriority,
    pub thread_id: Option<Uuid>,
    pub read: bool,
    pub read_by: Option<WorkspaceId>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatParticipant {
    pub workspace_id: WorkspaceId,
    pub alias: String,
    /// Dashboard users joining in observer capacity.
    pub observer: bool,
    /// Set when the participant signalled leave; the session itself never
    /// closes.
    pub left: bool,
}

/// A persistent conversation over an unordered participant set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub participants: Vec<ChatParticipant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn participant(&self, ws: WorkspaceId) -> Option<&ChatParticipant> {
        self.participants.iter().find(|p| p.workspace_id == ws)
    }

    pub fn is_participant(&self, ws: WorkspaceId) -> bool {
        self.participant(ws).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub project_id: ProjectId,
    pub sender_workspace_id: WorkspaceId,
    pub sender_alias: String,
    pub body: String,
    /// Sender's final-intent flag ("send-and-leave").
    pub leaving: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInvariant {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePlaybook {
    pub title: String,
    pub playbook: String,
}

/// The versioned JSON bundle that shapes agent behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicyBundle {
    #[serde(default)]
    pub invariants: Vec<PolicyInvariant>,
    #[serde(default)]
    pub roles: std::collections::BTreeMap<String, RolePlaybook>,
    #[serde(default)]
    pub adapters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub project_id: ProjectId,
    /// Contiguous per project, starting at 1.
    pub version: i64,
    pub bundle: PolicyBundle,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<WorkspaceId>,
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

/// Stored key metadata. Only the SHA-256 of the secret is persisted; the
/// plaintext is returned exactly once at mint time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub project_id: ProjectId,
    /// `None` for project-scoped keys used by proxy-mode internal traffic.
    pub agent_id: Option<WorkspaceId>,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_micros_drops_sub_micro_nanos() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let rounded = round_to_micros(ts);
        assert_eq!(rounded.nanosecond(), 123_456_000);
    }

    #[test]
    fn status_blocks_ready() {
        assert!(status::blocks_ready(status::OPEN));
        assert!(status::blocks_ready(status::IN_PROGRESS));
        assert!(!status::blocks_ready(status::CLOSED));
        assert!(!status::blocks_ready("wontfix"));
    }

    #[test]
    fn session_participant_lookup() {
        let ws = Uuid::new_v4();
        let session = ChatSession {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            participants: vec![ChatParticipant {
                workspace_id: ws,
                alias: "alice".into(),
                observer: false,
                left: false,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(session.is_participant(ws));
        assert!(!session.is_participant(Uuid::new_v4()));
    }
}
