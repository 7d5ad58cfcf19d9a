//! The "ready" computation: a bead is ready iff it is open and no blocker in
//! its transitive closure is open or in progress. Cycles are legal in
//! `blocked_by`; any bead on a cycle is treated as not-ready.

use std::collections::HashMap;

use uuid::Uuid;

use bh_core::error::Result;
use bh_core::types::status;
use bh_store::Db;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Ready,
    NotReady,
}

/// Bead ids in `project` that are ready to pick up, sorted.
pub async fn ready_beads(db: &Db, project_id: Uuid) -> Result<Vec<String>> {
    let rows = db.issues_for_ready(project_id).await?;
    Ok(compute_ready(&rows))
}

/// Pure core over `(bead_id, status, blocked_by)` rows.
pub(crate) fn compute_ready(rows: &[(String, String, Vec<bh_core::types::BeadRef>)]) -> Vec<String> {
    let statuses: HashMap<&str, &str> = rows
        .iter()
        .map(|(id, status, _)| (id.as_str(), status.as_str()))
        .collect();
    let blockers: HashMap<&str, Vec<&str>> = rows
        .iter()
        .map(|(id, _, blocked_by)| {
            (
                id.as_str(),
                blocked_by.iter().map(|r| r.bead_id.as_str()).collect(),
            )
        })
        .collect();

    let mut marks: HashMap<&str, Mark> = rows
        .iter()
        .map(|(id, _, _)| (id.as_str(), Mark::Unvisited))
        .collect();

    // DFS with colouring; hitting a grey node means a cycle.
    fn visit<'a>(
        id: &'a str,
        statuses: &HashMap<&'a str, &'a str>,
        blockers: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(id).copied() {
            Some(Mark::Ready) => return true,
            Some(Mark::NotReady) => return false,
            // On the current DFS path: a cycle, treated as not-ready.
            Some(Mark::InProgress) => return false,
            Some(Mark::Unvisited) => {}
            // Blockers in other repos are unknown here; assume unblocked.
            None => return true,
        }

        marks.insert(id, Mark::InProgress);
        let mut clear = true;
        for blocker in blockers.get(id).into_iter().flatten() {
            let blocker_status = statuses.get(blocker).copied();
            if let Some(s) = blocker_status {
                if status::blocks_ready(s) {
                    clear = false;
                }
            }
            if !visit(blocker, statuses, blockers, marks) {
                clear = false;
            }
        }
        marks.insert(id, if clear { Mark::Ready } else { Mark::NotReady });
        clear
    }

    let mut ready = Vec::new();
    for (id, bead_status, _) in rows {
        if bead_status != status::OPEN {
            continue;
        }
        if visit(id, &statuses, &blockers, &mut marks) {
            ready.push(id.clone());
        }
    }
    ready.sort();
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_core::types::BeadRef;

    fn row(id: &str, status: &str, blocked_by: &[&str]) -> (String, String, Vec<BeadRef>) {
        (
            id.to_string(),
            status.to_string(),
            blocked_by.iter().map(|b| BeadRef::local(*b)).collect(),
        )
    }

    #[test]
    fn unblocked_open_bead_is_ready() {
        let rows = vec![row("bd-1", "open", &[])];
        assert_eq!(compute_ready(&rows), vec!["bd-1"]);
    }

    #[test]
    fn open_blocker_blocks() {
        let rows = vec![row("bd-1", "open", &["bd-2"]), row("bd-2", "open", &[])];
        assert_eq!(compute_ready(&rows), vec!["bd-2"]);
    }

    #[test]
    fn closed_blocker_does_not_block() {
        let rows = vec![row("bd-1", "open", &["bd-2"]), row("bd-2", "closed", &[])];
        assert_eq!(compute_ready(&rows), vec!["bd-1"]);
    }

    #[test]
    fn transitive_blockers_count() {
        // bd-1 <- bd-2(closed) <- bd-3(in_progress)
        let rows = vec![
            row("bd-1", "open", &["bd-2"]),
            row("bd-2", "closed", &["bd-3"]),
            row("bd-3", "in_progress", &[]),
        ];
        assert!(compute_ready(&rows).is_empty());
    }

    #[test]
    fn cycles_are_not_ready() {
        let rows = vec![
            row("bd-1", "open", &["bd-2"]),
            row("bd-2", "open", &["bd-1"]),
            row("bd-3", "open", &[]),
        ];
        assert_eq!(compute_ready(&rows), vec!["bd-3"]);
    }

    #[test]
    fn self_cycle_is_not_ready() {
        let rows = vec![row("bd-1", "open", &["bd-1"])];
        assert!(compute_ready(&rows).is_empty());
    }

    #[test]
    fn unknown_blocker_is_assumed_unblocked() {
        // Cross-repo blockers may not be mirrored here.
        let rows = vec![row("bd-1", "open", &["other-repo-bead"])];
        assert_eq!(compute_ready(&rows), vec!["bd-1"]);
    }

    #[test]
    fn non_open_beads_are_never_listed() {
        let rows = vec![
            row("bd-1", "in_progress", &[]),
            row("bd-2", "closed", &[]),
            row("bd-3", "wontfix", &[]),
        ];
        assert!(compute_ready(&rows).is_empty());
    }
}
