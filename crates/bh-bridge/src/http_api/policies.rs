use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiResult;
use crate::auth::{AuthContext, Principal};
use crate::state::ApiState;

/// GET /v1/policies/active
pub(crate) async fn active(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let policy = state.policies.get_active(ctx.project_id).await?;
    Ok(Json(serde_json::json!({ "policy": policy })))
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct HistoryQuery {
    #[serde(default)]
    limit: Option<u32>,
}

/// GET /v1/policies/history -- newest first.
pub(crate) async fn history(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<bh_core::types::Policy>>> {
    let limit = bh_api_types::clamp_limit(query.limit);
    let policies = state.policies.list_history(ctx.project_id, limit).await?;
    Ok(Json(policies))
}

/// GET /v1/policies/{id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_core::types::Policy>> {
    let policy = state.policies.get_by_id(ctx.project_id, id).await?;
    Ok(Json(policy))
}

/// POST /v1/policies -- allocate the next version.
///
/// With `base_policy_id`, the call conflicts unless that id is still active
/// at commit; an identical bundle returns `created: false`.
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::PolicyCreateRequest>,
) -> ApiResult<impl IntoResponse> {
    let created_by = match &ctx.principal {
        Principal::ApiKey { agent_id } => *agent_id,
        _ => None,
    };
    let result = state
        .policies
        .create(ctx.project_id, req.bundle, req.base_policy_id, created_by)
        .await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(bh_api_types::PolicyCreateResponse {
            policy_id: result.policy.id,
            version: result.policy.version,
            created: result.created,
        }),
    ))
}

/// POST /v1/policies/{id}/activate
pub(crate) async fn activate(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_core::types::Policy>> {
    let project = state.project(ctx.project_id).await?;
    let policy = state
        .policies
        .activate(ctx.project_id, &project.slug, id)
        .await?;
    Ok(Json(policy))
}

/// POST /v1/policies/reset -- new version from the default snapshot, then
/// activate it.
pub(crate) async fn reset(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<bh_core::types::Policy>> {
    let project = state.project(ctx.project_id).await?;
    let created_by = match &ctx.principal {
        Principal::ApiKey { agent_id } => *agent_id,
        _ => None,
    };
    let policy = state
        .policies
        .reset_to_defaults(ctx.project_id, &project.slug, created_by)
        .await?;
    Ok(Json(policy))
}

/// POST /v1/policies/reload-defaults -- re-read the default assets from
/// disk.
pub(crate) async fn reload_defaults(
    State(state): State<Arc<ApiState>>,
    Extension(_ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    state.policies.reload_defaults()?;
    Ok(Json(serde_json::json!({ "reloaded": true })))
}
