use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use bh_core::types::{PresenceState, ProjectId, WorkspaceId};

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub workspace_id: WorkspaceId,
    pub project_id: ProjectId,
    pub last_seen_at: DateTime<Utc>,
}

/// TTL presence cache with a per-project index for O(1) status listings.
///
/// `active` within the TTL, `idle` within twice the TTL, `offline` beyond.
/// The cache can be wiped at any time and reseeded from the durable
/// `last_seen_at` timestamps.
pub struct PresenceCache {
    ttl: Duration,
    entries: DashMap<WorkspaceId, PresenceEntry>,
    by_project: DashMap<ProjectId, HashSet<WorkspaceId>>,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            by_project: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a sighting. Called on every authenticated write.
    pub fn touch(&self, project_id: ProjectId, workspace_id: WorkspaceId, at: DateTime<Utc>) {
        self.entries.insert(
            workspace_id,
            PresenceEntry {
                workspace_id,
                project_id,
                last_seen_at: at,
            },
        );
        self.by_project
            .entry(project_id)
            .or_default()
            .insert(workspace_id);
    }

    /// Classify one workspace right now.
    pub fn state(&self, workspace_id: WorkspaceId, now: DateTime<Utc>) -> PresenceState {
        match self.entries.get(&workspace_id) {
            Some(entry) => classify(entry.last_seen_at, now, self.ttl),
            None => PresenceState::Offline,
        }
    }

    /// All sightings for a project with their classification.
    pub fn project_states(
        &self,
        project_id: ProjectId,
        now: DateTime<Utc>,
    ) -> Vec<(WorkspaceId, PresenceState, DateTime<Utc>)> {
        let Some(ids) = self.by_project.get(&project_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| {
                (
                    entry.workspace_id,
                    classify(entry.last_seen_at, now, self.ttl),
                    entry.last_seen_at,
                )
            })
            .collect()
    }

    /// Drop entries not seen within 2×TTL; they are offline either way.
    /// Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let stale: Vec<PresenceEntry> = self
            .entries
            .iter()
            .filter(|e| classify(e.last_seen_at, now, self.ttl) == PresenceState::Offline)
            .map(|e| e.value().clone())
            .collect();
        for entry in stale {
            self.entries.remove(&entry.workspace_id);
            if let Some(mut ids) = self.by_project.get_mut(&entry.project_id) {
                ids.remove(&entry.workspace_id);
            }
            removed += 1;
        }
        removed
    }

    /// Reseed from durable `last_seen_at` values after a wipe.
    pub fn rebuild(
        &self,
        project_id: ProjectId,
        seen: impl IntoIterator<Item = (WorkspaceId, Option<DateTime<Utc>>)>,
    ) {
        for (workspace_id, last_seen) in seen {
            if let Some(at) = last_seen {
                self.touch(project_id, workspace_id, at);
            }
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.by_project.clear();
    }
}

fn classify(last_seen: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> PresenceState {
    let age = (now - last_seen).to_std().unwrap_or(Duration::ZERO);
    if age < ttl {
        PresenceState::Active
    } else if age < ttl * 2 {
        PresenceState::Idle
    } else {
        PresenceState::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn cache() -> PresenceCache {
        PresenceCache::new(Duration::from_secs(1800))
    }

    #[test]
    fn active_idle_offline_thresholds() {
        let cache = cache();
        let (project, ws) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        cache.touch(project, ws, now - chrono::Duration::seconds(60));
        assert_eq!(cache.state(ws, now), PresenceState::Active);

        cache.touch(project, ws, now - chrono::Duration::seconds(1801));
        assert_eq!(cache.state(ws, now), PresenceState::Idle);

        cache.touch(project, ws, now - chrono::Duration::seconds(3601));
        assert_eq!(cache.state(ws, now), PresenceState::Offline);
    }

    #[test]
    fn unknown_workspace_is_offline() {
        assert_eq!(
            cache().state(Uuid::new_v4(), Utc::now()),
            PresenceState::Offline
        );
    }

    #[test]
    fn sweep_drops_only_offline() {
        let cache = cache();
        let project = Uuid::new_v4();
        let (fresh, stale) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        cache.touch(project, fresh, now);
        cache.touch(project, stale, now - chrono::Duration::seconds(4000));

        assert_eq!(cache.sweep(now), 1);
        assert_eq!(cache.project_states(project, now).len(), 1);
    }

    #[test]
    fn rebuild_restores_project_index() {
        let cache = cache();
        let project = Uuid::new_v4();
        let ws = Uuid::new_v4();
        let now = Utc::now();

        cache.touch(project, ws, now);
        cache.clear();
        assert!(cache.project_states(project, now).is_empty());

        cache.rebuild(project, vec![(ws, Some(now)), (Uuid::new_v4(), None)]);
        let states = cache.project_states(project, now);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].1, PresenceState::Active);
    }
}
