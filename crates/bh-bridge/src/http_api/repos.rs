use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use bh_core::error::Error;
use bh_core::origin;

use crate::api_error::{ApiError, ApiResult};
use crate::auth::AuthContext;
use crate::state::ApiState;

fn repo_body(repo: &bh_core::types::Repo) -> bh_api_types::RepoBody {
    bh_api_types::RepoBody {
        id: repo.id,
        project_id: repo.project_id,
        canonical_origin: repo.canonical_origin.clone(),
        created_at: repo.created_at,
    }
}

/// GET /v1/repos
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<bh_api_types::RepoBody>>> {
    let repos = state.db.repos_for_project(ctx.project_id).await?;
    Ok(Json(repos.iter().map(repo_body).collect()))
}

/// POST /v1/repos -- bind a new origin to this project.
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::RepoCreateRequest>,
) -> ApiResult<impl IntoResponse> {
    let canonical = origin::canonicalize(&req.origin)?;
    let repo = state
        .db
        .ensure_repo(ctx.project_id, canonical)
        .await?
        .ok_or_else(|| {
            ApiError(Error::conflict(
                "repo origin is already bound to another project",
            ))
        })?;
    Ok((StatusCode::CREATED, Json(repo_body(&repo))))
}

/// DELETE /v1/repos/{id} -- soft delete only; repos are never re-bound.
pub(crate) async fn soft_delete(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.db.soft_delete_repo(ctx.project_id, id).await? {
        return Err(ApiError(Error::NotFound("repo not found".into())));
    }
    Ok(Json(serde_json::json!({ "status": "deleted", "id": id })))
}
