use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};

use super::claim_body;
use crate::api_error::ApiResult;
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// GET /v1/claims
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<bh_api_types::ClaimBody>>> {
    let claims = state.claims.list(ctx.project_id).await?;
    Ok(Json(claims.iter().map(claim_body).collect()))
}

/// POST /v1/claims -- acquire. Without `jump_in`, a held bead returns 409
/// with the claimants in `fields`.
pub(crate) async fn acquire(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::ClaimRequest>,
) -> ApiResult<impl IntoResponse> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;
    let claim = state
        .claims
        .claim(&project.slug, &workspace, req.bead_id, req.apex, req.jump_in)
        .await?;
    Ok((StatusCode::CREATED, Json(claim_body(&claim))))
}

/// POST /v1/claims/release -- releasing a claim not held is a no-op.
pub(crate) async fn release(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::ClaimReleaseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;
    state
        .claims
        .release(&project.slug, &workspace, req.bead_id.clone())
        .await?;
    Ok(Json(serde_json::json!({ "released": req.bead_id })))
}
