//! Render outbox payloads into mail subjects and bodies.

use bh_core::types::OutboxEntry;

/// `(subject, body)` for one notification. The body carries the fingerprint
/// so recipients can dedupe at-least-once deliveries.
pub(crate) fn render(entry: &OutboxEntry) -> (String, String) {
    match entry.event_type.as_str() {
        "status_change" => {
            let bead_id = entry.payload["bead_id"].as_str().unwrap_or("?");
            let old = entry.payload["old_status"].as_str().unwrap_or("?");
            let new = entry.payload["new_status"].as_str().unwrap_or("?");
            let subject = format!("{bead_id}: {old} \u{2192} {new}");
            let body = format!(
                "Bead {bead_id} changed status: {old} \u{2192} {new}.\n\n\
                 ---\nfingerprint: {}\n",
                entry.fingerprint
            );
            (subject, body)
        }
        other => {
            let subject = format!("notification: {other}");
            let body = format!(
                "{}\n\n---\nfingerprint: {}\n",
                serde_json::to_string_pretty(&entry.payload).unwrap_or_default(),
                entry.fingerprint
            );
            (subject, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::OutboxStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(event_type: &str, payload: serde_json::Value) -> OutboxEntry {
        OutboxEntry {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            recipient_workspace_id: Uuid::new_v4(),
            recipient_alias: "charlie".into(),
            event_type: event_type.into(),
            payload,
            fingerprint: "fp123".into(),
            attempts: 0,
            last_error: None,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            next_attempt_at: Utc::now(),
            processed_at: None,
            delivered_message_id: None,
        }
    }

    #[test]
    fn status_change_references_bead_and_transition() {
        let (subject, body) = render(&entry(
            "status_change",
            serde_json::json!({"bead_id": "bd-42", "old_status": "open", "new_status": "in_progress"}),
        ));
        assert!(subject.contains("bd-42"));
        assert!(body.contains("bd-42"));
        assert!(body.contains("open"));
        assert!(body.contains("in_progress"));
        assert!(body.contains("fp123"));
    }

    #[test]
    fn unknown_event_type_still_renders() {
        let (subject, body) = render(&entry("something_else", serde_json::json!({"k": "v"})));
        assert!(subject.contains("something_else"));
        assert!(body.contains("fp123"));
    }
}
