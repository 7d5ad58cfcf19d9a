use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use bh_core::error::Error;
use bh_core::validate;
use bh_store::SubscribeOutcome;

use crate::api_error::{ApiError, ApiResult};
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// POST /v1/subscriptions -- watch a bead for status changes.
pub(crate) async fn create(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::SubscriptionCreateRequest>,
) -> ApiResult<impl IntoResponse> {
    validate::validate_bead_id(&req.bead_id)?;
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;

    match state
        .db
        .create_subscription(
            ctx.project_id,
            workspace.id,
            req.bead_id,
            req.repo,
            req.event_types,
        )
        .await?
    {
        SubscribeOutcome::Created(subscription) => {
            Ok((StatusCode::CREATED, Json(subscription)))
        }
        SubscribeOutcome::Duplicate(existing) => Err(ApiError(Error::conflict_with(
            "subscription already exists",
            serde_json::json!({ "subscription_id": existing.id }),
        ))),
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct SubscriptionQuery {
    #[serde(default)]
    workspace_id: Option<Uuid>,
}

/// GET /v1/subscriptions -- the caller's subscriptions.
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<SubscriptionQuery>,
) -> ApiResult<Json<Vec<bh_core::types::Subscription>>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    let subscriptions = state
        .db
        .subscriptions_for_workspace(ctx.project_id, workspace.id)
        .await?;
    Ok(Json(subscriptions))
}

/// DELETE /v1/subscriptions/{id}
pub(crate) async fn remove(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<SubscriptionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    if !state
        .db
        .delete_subscription(ctx.project_id, workspace.id, id)
        .await?
    {
        return Err(ApiError(Error::NotFound("subscription not found".into())));
    }
    Ok(Json(serde_json::json!({ "status": "deleted", "id": id })))
}
