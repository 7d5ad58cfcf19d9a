use std::sync::Arc;

use axum::{extract::State, Extension, Json};

use bh_core::error::Error;
use bh_engine::sync::{ClaimSnapshotRecord, SyncEngine, SyncIssueRecord};

use crate::api_error::{ApiError, ApiResult};
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// POST /v1/bdh/sync -- accept one client push.
///
/// Issues arrive as JSONL and/or a structured array; both funnel into the
/// same parser. The claims snapshot replaces the workspace's claim set. All
/// writes land in one transaction; notifications for detected status
/// changes commit with it.
pub(crate) async fn sync(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::SyncRequest>,
) -> ApiResult<Json<bh_engine::sync::SyncCounts>> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let changed: Vec<SyncIssueRecord> = req
        .changed_issues
        .into_iter()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| ApiError(Error::Validation(format!("changed_issues: {e}"))))
        })
        .collect::<Result<_, _>>()?;
    let upserts = SyncEngine::parse_records(req.issues_jsonl.as_deref(), changed)?;

    let claims_snapshot = match req.claims_snapshot {
        None => None,
        Some(raw) => Some(
            raw.into_iter()
                .map(|v| {
                    serde_json::from_value::<ClaimSnapshotRecord>(v)
                        .map_err(|e| ApiError(Error::Validation(format!("claims_snapshot: {e}"))))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };

    // The pushing repo's canonical origin scopes repo-specific
    // subscriptions.
    let repo_origin = match workspace.repo_id {
        Some(repo_id) => state
            .db
            .repos_for_project(ctx.project_id)
            .await?
            .into_iter()
            .find(|r| r.id == repo_id)
            .map(|r| r.canonical_origin),
        None => None,
    };

    let counts = state
        .sync
        .sync(
            &project.slug,
            &workspace,
            repo_origin,
            upserts,
            req.deleted_ids,
            claims_snapshot,
            req.notifications_ack,
        )
        .await?;
    Ok(Json(counts))
}

/// POST /v1/bdh/check -- pre-flight for a proposed client command.
pub(crate) async fn check(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::CheckRequest>,
) -> ApiResult<Json<Vec<bh_engine::claims::CheckResult>>> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let results = state
        .claims
        .check(&workspace, &req.command, req.beads, req.paths)
        .await?;
    Ok(Json(results))
}
