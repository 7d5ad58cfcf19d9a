use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use bh_core::types::EscalationStatus;

use crate::api_error::ApiResult;
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// POST /v1/escalations -- raise a request for human intervention.
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::EscalationCreateRequest>,
) -> ApiResult<impl IntoResponse> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;
    let escalation = state
        .escalations
        .create(
            &project.slug,
            &workspace,
            req.subject,
            req.situation,
            req.options,
            req.expires_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(escalation)))
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct EscalationQuery {
    #[serde(default)]
    status: Option<EscalationStatus>,
}

/// GET /v1/escalations
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<EscalationQuery>,
) -> ApiResult<Json<Vec<bh_core::types::Escalation>>> {
    let escalations = state.escalations.list(ctx.project_id, query.status).await?;
    Ok(Json(escalations))
}

/// GET /v1/escalations/{id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_core::types::Escalation>> {
    let escalation = state.escalations.get(ctx.project_id, id).await?;
    Ok(Json(escalation))
}

/// POST /v1/escalations/{id}/respond -- idempotent per response value.
pub(crate) async fn respond(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<bh_api_types::EscalationRespondRequest>,
) -> ApiResult<Json<bh_core::types::Escalation>> {
    let project = state.project(ctx.project_id).await?;
    let escalation = state
        .escalations
        .respond(
            ctx.project_id,
            &project.slug,
            id,
            req.response,
            req.response_note,
        )
        .await?;
    Ok(Json(escalation))
}
