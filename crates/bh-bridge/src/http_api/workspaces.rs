use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use bh_core::error::Error;
use bh_engine::registry::InitRequest as EngineInit;
use bh_store::WorkspacePatch;

use super::workspace_body;
use crate::api_error::{ApiError, ApiResult};
use crate::auth::{bind_actor, redact_workspace, AuthContext, Principal};
use crate::state::ApiState;

/// POST /v1/init -- atomic workspace bootstrap.
///
/// Unauthenticated: this is how an agent obtains its key. Creates (or finds)
/// the project by slug, binds the repo, mints one plaintext key, and creates
/// the workspace. The key appears in this response and never again.
pub(crate) async fn init(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<bh_api_types::InitRequest>,
) -> ApiResult<impl IntoResponse> {
    if state.is_draining() {
        return Err(ApiError(Error::Unavailable("server is draining".into())));
    }
    let resp = state
        .registry
        .init(EngineInit {
            project_slug: req.project_slug,
            tenant_id: req.tenant_id,
            repo_origin: req.repo_origin,
            kind: req.kind,
            alias: req.alias,
            auto_suggest_alias: req.auto_suggest_alias,
            human_name: req.human_name,
            role: req.role,
            timezone: req.timezone,
            host: req.host,
            path: req.path,
        })
        .await?;

    let body = bh_api_types::InitResponse {
        project_id: resp.project.id,
        project_slug: resp.project.slug,
        repo_id: resp.repo.as_ref().map(|r| r.id),
        canonical_origin: resp.repo.map(|r| r.canonical_origin),
        workspace: workspace_body(&resp.workspace, None),
        api_key: resp.api_key,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// POST /v1/workspaces/register -- add a workspace under existing auth.
///
/// Same bootstrap path, but scoped to the authenticated project; the slug in
/// the body must match it. An agent re-registering its own alias gets its
/// existing workspace back instead of a conflict (no new key is minted).
pub(crate) async fn register(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::InitRequest>,
) -> ApiResult<axum::response::Response> {
    let project = state.project(ctx.project_id).await?;
    if req.project_slug != project.slug {
        return Err(ApiError(Error::Forbidden(
            "cannot register into another project".into(),
        )));
    }

    if let Principal::ApiKey {
        agent_id: Some(agent_id),
    } = ctx.principal
    {
        if let Some(existing) = state.db.workspace_by_id(agent_id).await? {
            if !existing.is_deleted() && existing.alias == req.alias {
                return Ok(Json(serde_json::json!({
                    "workspace": workspace_body(&existing, None),
                    "created": false,
                }))
                .into_response());
            }
        }
    }

    Ok(init(State(state), Json(req)).await?.into_response())
}

/// GET /v1/workspaces -- list active workspaces with presence merged in.
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<bh_api_types::WorkspaceBody>>> {
    let listed = state.registry.list_with_presence(ctx.project_id).await?;
    let mut bodies: Vec<_> = listed
        .iter()
        .map(|(ws, presence)| workspace_body(ws, Some(*presence)))
        .collect();
    for body in &mut bodies {
        redact_workspace(&ctx, body);
    }
    Ok(Json(bodies))
}

/// GET /v1/workspaces/{id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_api_types::WorkspaceBody>> {
    let ws = state.registry.get(id).await?;
    if ws.project_id != ctx.project_id {
        return Err(ApiError(Error::NotFound("workspace not found".into())));
    }
    let presence = state
        .eph
        .presence
        .state(ws.id, chrono::Utc::now());
    let mut body = workspace_body(&ws, Some(presence));
    redact_workspace(&ctx, &mut body);
    Ok(Json(body))
}

/// PATCH /v1/workspaces/{id} -- update mutable fields.
///
/// Alias, project, repo, and kind are immutable; naming them fails with 412.
pub(crate) async fn update(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<bh_api_types::WorkspaceUpdateRequest>,
) -> ApiResult<Json<bh_api_types::WorkspaceBody>> {
    if req.alias.is_some() || req.project_id.is_some() || req.repo_id.is_some() || req.kind.is_some()
    {
        return Err(ApiError(Error::PreconditionFailed(
            "alias, project, repo, and kind are immutable".into(),
        )));
    }
    let target = bind_actor(&state, &ctx, Some(id)).await?;

    let patch = WorkspacePatch {
        human_name: req.human_name,
        role: req.role,
        current_branch: req.current_branch,
        focus: req.focus,
        host: req.host,
        path: req.path,
        timezone: req.timezone,
    };
    let updated = if patch.is_empty() {
        target
    } else {
        state.registry.update(id, patch).await?
    };
    Ok(Json(workspace_body(&updated, None)))
}

/// DELETE /v1/workspaces/{id} -- soft delete; the alias becomes reusable.
pub(crate) async fn soft_delete(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    // Agents may delete themselves; project-scoped keys and dashboard users
    // may delete any workspace in the project.
    let _ = bind_actor(&state, &ctx, Some(id)).await?;
    state.registry.soft_delete(id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted", "id": id })))
}

/// POST /v1/workspaces/{id}/restore -- clear the soft-delete marker.
pub(crate) async fn restore(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_api_types::WorkspaceBody>> {
    if ctx.is_public_reader() {
        return Err(ApiError(Error::Forbidden("public readers cannot write".into())));
    }
    // Restore cannot go through bind_actor: the target is deleted. Check
    // project scope directly.
    let ws = state.registry.get(id).await?;
    if ws.project_id != ctx.project_id {
        return Err(ApiError(Error::NotFound("workspace not found".into())));
    }
    if let Principal::ApiKey {
        agent_id: Some(agent_id),
    } = ctx.principal
    {
        if agent_id != id {
            return Err(ApiError(Error::Forbidden(
                "workspace_id does not match the authenticated agent".into(),
            )));
        }
    }
    let restored = state.registry.restore(id).await?;
    Ok(Json(workspace_body(&restored, None)))
}
