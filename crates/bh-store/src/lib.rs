//! Durable storage for BeadHub.
//!
//! One SQLite database (WAL mode, single serialised writer) holds three
//! logical namespaces expressed as table prefixes: `auth_*` (agents, API
//! keys, mail, chat), `domain_*` (projects, repos, workspaces, claims,
//! subscriptions, outbox, audit, policies), and `issues_*` (the bead mirror).
//! Every row carries `project_id` and every query filters by it.
//!
//! Multi-step operations with atomicity requirements (workspace bootstrap,
//! sync reconciliation, policy version allocation, outbox batch claim) are
//! implemented as single `Db::call` closures so their transaction never
//! crosses an await point.

mod apikeys;
mod audit;
mod chat;
mod claims;
mod db;
mod escalations;
mod error;
mod issues;
mod mail;
mod migrations;
mod outbox;
mod policies;
mod projects;
mod subscriptions;
mod workspaces;

pub use apikeys::ResolvedKey;
pub use chat::SessionPage;
pub use claims::{AcquireOutcome, ClaimReconcile, ClaimSnapshotEntry};
pub use db::Db;
pub use error::StoreError;
pub use escalations::RespondOutcome;
pub use issues::{IssueFilter, IssuePage, IssueUpsert, StatusChange, SyncApply, SyncApplyResult};
pub use mail::AckOutcome;
pub use policies::PolicyCreate;
pub use projects::{InitBootstrap, InitOutcome};
pub use subscriptions::SubscribeOutcome;
pub use workspaces::WorkspacePatch;
