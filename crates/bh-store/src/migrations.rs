//! Versioned, forward-only schema migrations, applied at startup.

use crate::db::Db;
use crate::error::StoreError;

/// Ordered migration batches. Never edit an entry after release; append a new
/// one instead.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_domain",
        "
        CREATE TABLE domain_projects (
            id                TEXT PRIMARY KEY,
            tenant_id         TEXT,
            slug              TEXT NOT NULL,
            visibility        TEXT NOT NULL DEFAULT 'private',
            active_policy_id  TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            deleted_at        TEXT
        );
        CREATE UNIQUE INDEX idx_projects_slug_active
            ON domain_projects(COALESCE(tenant_id, ''), slug) WHERE deleted_at IS NULL;

        CREATE TABLE domain_repos (
            id               TEXT PRIMARY KEY,
            project_id       TEXT NOT NULL REFERENCES domain_projects(id),
            canonical_origin TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            deleted_at       TEXT
        );
        CREATE UNIQUE INDEX idx_repos_origin_active
            ON domain_repos(canonical_origin) WHERE deleted_at IS NULL;

        CREATE TABLE domain_workspaces (
            id             TEXT PRIMARY KEY,
            project_id     TEXT NOT NULL REFERENCES domain_projects(id),
            repo_id        TEXT REFERENCES domain_repos(id),
            kind           TEXT NOT NULL,
            alias          TEXT NOT NULL,
            human_name     TEXT,
            role           TEXT,
            current_branch TEXT,
            focus          TEXT,
            host           TEXT,
            path           TEXT,
            timezone       TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            deleted_at     TEXT,
            last_seen_at   TEXT
        );
        CREATE UNIQUE INDEX idx_workspaces_alias_active
            ON domain_workspaces(project_id, alias) WHERE deleted_at IS NULL;
        CREATE INDEX idx_workspaces_project ON domain_workspaces(project_id);

        CREATE TABLE domain_bead_claims (
            project_id   TEXT NOT NULL,
            bead_id      TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            alias        TEXT NOT NULL,
            human_name   TEXT,
            apex         TEXT,
            claimed_at   TEXT NOT NULL,
            PRIMARY KEY (project_id, bead_id, workspace_id)
        );
        CREATE INDEX idx_claims_workspace ON domain_bead_claims(project_id, workspace_id);

        CREATE TABLE domain_subscriptions (
            id           TEXT PRIMARY KEY,
            project_id   TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            bead_id      TEXT NOT NULL,
            repo         TEXT,
            event_types  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        CREATE UNIQUE INDEX idx_subscriptions_tuple
            ON domain_subscriptions(project_id, workspace_id, bead_id, COALESCE(repo, ''));
        CREATE INDEX idx_subscriptions_bead ON domain_subscriptions(project_id, bead_id);

        CREATE TABLE domain_notification_outbox (
            id                     TEXT PRIMARY KEY,
            project_id             TEXT NOT NULL,
            recipient_workspace_id TEXT NOT NULL,
            recipient_alias        TEXT NOT NULL,
            event_type             TEXT NOT NULL,
            payload                TEXT NOT NULL,
            fingerprint            TEXT NOT NULL,
            attempts               INTEGER NOT NULL DEFAULT 0,
            last_error             TEXT,
            status                 TEXT NOT NULL DEFAULT 'pending',
            created_at             TEXT NOT NULL,
            updated_at             TEXT NOT NULL,
            next_attempt_at        TEXT NOT NULL,
            processed_at           TEXT,
            delivered_message_id   TEXT
        );
        CREATE INDEX idx_outbox_drain
            ON domain_notification_outbox(status, next_attempt_at, created_at);
        CREATE INDEX idx_outbox_dedupe
            ON domain_notification_outbox(recipient_workspace_id, fingerprint);

        CREATE TABLE domain_audit_log (
            id                 TEXT PRIMARY KEY,
            project_id         TEXT NOT NULL,
            actor_workspace_id TEXT,
            action             TEXT NOT NULL,
            payload            TEXT NOT NULL,
            created_at         TEXT NOT NULL
        );
        CREATE INDEX idx_audit_project ON domain_audit_log(project_id, created_at);

        CREATE TABLE domain_project_policies (
            id         TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES domain_projects(id),
            version    INTEGER NOT NULL,
            bundle     TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_by TEXT,
            UNIQUE (project_id, version)
        );

        CREATE TABLE domain_escalations (
            id            TEXT PRIMARY KEY,
            project_id    TEXT NOT NULL,
            workspace_id  TEXT NOT NULL,
            alias         TEXT NOT NULL,
            subject       TEXT NOT NULL,
            situation     TEXT NOT NULL,
            options       TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            response      TEXT,
            response_note TEXT,
            created_at    TEXT NOT NULL,
            expires_at    TEXT NOT NULL,
            responded_at  TEXT
        );
        CREATE INDEX idx_escalations_project ON domain_escalations(project_id, created_at);
        ",
    ),
    (
        "0002_auth",
        "
        CREATE TABLE auth_agents (
            id         TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE auth_api_keys (
            id         TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            agent_id   TEXT,
            key_hash   TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE auth_messages (
            id                TEXT PRIMARY KEY,
            project_id        TEXT NOT NULL,
            from_workspace_id TEXT NOT NULL,
            from_alias        TEXT NOT NULL,
            to_workspace_id   TEXT NOT NULL,
            subject           TEXT NOT NULL,
            body              TEXT NOT NULL,
            priority          TEXT NOT NULL DEFAULT 'normal',
            thread_id         TEXT,
            read              INTEGER NOT NULL DEFAULT 0,
            read_by           TEXT,
            read_at           TEXT,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX idx_messages_inbox
            ON auth_messages(to_workspace_id, created_at DESC);

        CREATE TABLE auth_chat_sessions (
            id         TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE auth_chat_participants (
            session_id   TEXT NOT NULL REFERENCES auth_chat_sessions(id),
            workspace_id TEXT NOT NULL,
            alias        TEXT NOT NULL,
            observer     INTEGER NOT NULL DEFAULT 0,
            has_left     INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (session_id, workspace_id)
        );
        CREATE INDEX idx_chat_participants_ws ON auth_chat_participants(workspace_id);

        CREATE TABLE auth_chat_messages (
            id                  TEXT PRIMARY KEY,
            session_id          TEXT NOT NULL REFERENCES auth_chat_sessions(id),
            project_id          TEXT NOT NULL,
            sender_workspace_id TEXT NOT NULL,
            sender_alias        TEXT NOT NULL,
            body                TEXT NOT NULL,
            leaving             INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX idx_chat_messages_session
            ON auth_chat_messages(session_id, created_at);
        ",
    ),
    (
        "0003_issues",
        "
        CREATE TABLE issues_beads (
            project_id TEXT NOT NULL,
            bead_id    TEXT NOT NULL,
            title      TEXT NOT NULL,
            body       TEXT,
            status     TEXT NOT NULL,
            priority   INTEGER NOT NULL DEFAULT 0,
            assignee   TEXT,
            creator    TEXT,
            labels     TEXT NOT NULL DEFAULT '[]',
            parent     TEXT,
            blocked_by TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (project_id, bead_id)
        );
        CREATE INDEX idx_issues_status ON issues_beads(project_id, status);
        CREATE INDEX idx_issues_title  ON issues_beads(project_id, title);
        ",
    ),
    (
        "0004_immutable_guards",
        "
        CREATE TRIGGER trg_workspaces_immutable
        BEFORE UPDATE ON domain_workspaces
        WHEN NEW.project_id IS NOT OLD.project_id
          OR NEW.repo_id    IS NOT OLD.repo_id
          OR NEW.alias      IS NOT OLD.alias
          OR NEW.kind       IS NOT OLD.kind
        BEGIN
            SELECT RAISE(ABORT, 'workspace project/repo/alias/kind are immutable');
        END;

        CREATE TRIGGER trg_repos_immutable
        BEFORE UPDATE ON domain_repos
        WHEN NEW.project_id IS NOT OLD.project_id
          OR NEW.canonical_origin IS NOT OLD.canonical_origin
        BEGIN
            SELECT RAISE(ABORT, 'repo project/origin binding is immutable');
        END;
        ",
    ),
];

/// Apply any migrations newer than the recorded schema version.
pub async fn apply(db: &Db) -> Result<(), StoreError> {
    db.call(|conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                 name       TEXT PRIMARY KEY,
                 applied_at TEXT NOT NULL
             );",
        )?;

        for (name, sql) in MIGRATIONS {
            let already: bool = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE name = ?1",
                    [name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if already {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
                rusqlite::params![name, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::info!(migration = name, "schema migration applied");
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_is_idempotent() {
        let db = Db::open_in_memory().await.unwrap();
        // open() already applied; a second run is a no-op.
        apply(&db).await.unwrap();
        apply(&db).await.unwrap();
    }

    #[tokio::test]
    async fn all_tables_exist() {
        let db = Db::open_in_memory().await.unwrap();
        let count: i64 = db
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master
                     WHERE type = 'table' AND (
                         name LIKE 'domain_%' OR name LIKE 'auth_%' OR name LIKE 'issues_%'
                     )",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 16);
    }
}
