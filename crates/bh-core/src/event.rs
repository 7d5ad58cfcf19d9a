use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ProjectId, WorkspaceId};

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

/// Every domain mutation emits one of these on the project's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "bead.claimed")]
    BeadClaimed,
    #[serde(rename = "bead.unclaimed")]
    BeadUnclaimed,
    #[serde(rename = "bead.status_changed")]
    BeadStatusChanged,
    #[serde(rename = "message.delivered")]
    MessageDelivered,
    #[serde(rename = "message.acknowledged")]
    MessageAcknowledged,
    #[serde(rename = "chat.message_sent")]
    ChatMessageSent,
    #[serde(rename = "escalation.created")]
    EscalationCreated,
    #[serde(rename = "escalation.responded")]
    EscalationResponded,
    #[serde(rename = "reservation.acquired")]
    ReservationAcquired,
    #[serde(rename = "reservation.released")]
    ReservationReleased,
    #[serde(rename = "reservation.renewed")]
    ReservationRenewed,
    #[serde(rename = "sync.completed")]
    SyncCompleted,
    #[serde(rename = "workspace.registered")]
    WorkspaceRegistered,
    #[serde(rename = "workspace.deleted")]
    WorkspaceDeleted,
    #[serde(rename = "policy.activated")]
    PolicyActivated,
}

impl EventType {
    /// The wire name, e.g. `bead.claimed`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BeadClaimed => "bead.claimed",
            EventType::BeadUnclaimed => "bead.unclaimed",
            EventType::BeadStatusChanged => "bead.status_changed",
            EventType::MessageDelivered => "message.delivered",
            EventType::MessageAcknowledged => "message.acknowledged",
            EventType::ChatMessageSent => "chat.message_sent",
            EventType::EscalationCreated => "escalation.created",
            EventType::EscalationResponded => "escalation.responded",
            EventType::ReservationAcquired => "reservation.acquired",
            EventType::ReservationReleased => "reservation.released",
            EventType::ReservationRenewed => "reservation.renewed",
            EventType::SyncCompleted => "sync.completed",
            EventType::WorkspaceRegistered => "workspace.registered",
            EventType::WorkspaceDeleted => "workspace.deleted",
            EventType::PolicyActivated => "policy.activated",
        }
    }
}

/// The common envelope carried by the event bus and the live stream.
///
/// `seq` is assigned per-subscriber at delivery time so a client can detect
/// dropped events (non-contiguous sequence) and re-read REST state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub project_id: ProjectId,
    pub project_slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, project_id: ProjectId, project_slug: impl Into<String>) -> Self {
        Self {
            event_type,
            project_id,
            project_slug: project_slug.into(),
            workspace_id: None,
            workspace_alias: None,
            human_name: None,
            repo: None,
            timestamp: Utc::now(),
            seq: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn workspace(mut self, id: WorkspaceId, alias: impl Into<String>) -> Self {
        self.workspace_id = Some(id);
        self.workspace_alias = Some(alias.into());
        self
    }

    pub fn human_name(mut self, name: Option<String>) -> Self {
        self.human_name = name;
        self
    }

    pub fn repo(mut self, repo: Option<String>) -> Self {
        self.repo = repo;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn event_type_round_trips_through_serde() {
        let json = serde_json::to_string(&EventType::BeadStatusChanged).unwrap();
        assert_eq!(json, "\"bead.status_changed\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::BeadStatusChanged);
    }

    #[test]
    fn as_str_matches_serde_name() {
        for ty in [
            EventType::BeadClaimed,
            EventType::ChatMessageSent,
            EventType::ReservationRenewed,
            EventType::SyncCompleted,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json.trim_matches('"'), ty.as_str());
        }
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let ev = Event::new(EventType::SyncCompleted, Uuid::new_v4(), "demo");
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("workspace_id").is_none());
        assert!(json.get("seq").is_none());
        assert_eq!(json["type"], "sync.completed");
    }
}
