use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};

use bh_core::types::WorkspaceKind;
use bh_engine::registry::InitRequest as EngineInit;

use super::workspace_body;
use crate::api_error::ApiResult;
use crate::auth::AuthContext;
use crate::state::ApiState;

/// GET /v1/dashboard/config -- what a dashboard needs to boot.
pub(crate) async fn config(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<bh_api_types::DashboardConfig>> {
    let project = state.project(ctx.project_id).await?;
    Ok(Json(bh_api_types::DashboardConfig {
        stream_path: format!("/v1/status/stream?project_slug={}", project.slug),
        project_slug: project.slug,
        visibility: project.visibility,
    }))
}

/// POST /v1/dashboard/identity -- create a dashboard-class workspace for the
/// authenticated user. No repo binding; same auth and redaction rules as
/// every other endpoint.
pub(crate) async fn identity(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::DashboardIdentityRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = state.project(ctx.project_id).await?;
    let resp = state
        .registry
        .init(EngineInit {
            project_slug: project.slug,
            tenant_id: project.tenant_id,
            repo_origin: None,
            kind: WorkspaceKind::Dashboard,
            alias: req.alias,
            auto_suggest_alias: true,
            human_name: req.human_name,
            role: Some("dashboard".into()),
            timezone: None,
            host: None,
            path: None,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "workspace": workspace_body(&resp.workspace, None),
            "api_key": resp.api_key,
        })),
    ))
}
