use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use bh_core::error::Error;
use bh_core::event::{Event, EventType};
use bh_ephemeral::ReserveOutcome;

use super::reservation_body;
use crate::api_error::{ApiError, ApiResult};
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// POST /v1/reservations -- acquire or renew an advisory file lock.
///
/// A live reservation by another workspace answers 200 with
/// `acquired: false` and the holder; advisory locks warn, they never block.
pub(crate) async fn reserve(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::ReserveRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.path.is_empty() {
        return Err(ApiError(Error::Validation("path must not be empty".into())));
    }
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let outcome = state.eph.reservations.reserve(
        ctx.project_id,
        req.path.clone(),
        workspace.id,
        workspace.alias.clone(),
        req.reason,
        Utc::now(),
    );
    let (status, event_type, body) = match outcome {
        ReserveOutcome::Acquired(r) => (
            StatusCode::CREATED,
            Some(EventType::ReservationAcquired),
            serde_json::json!({ "acquired": true, "reservation": reservation_body(&r) }),
        ),
        ReserveOutcome::Renewed(r) => (
            StatusCode::OK,
            Some(EventType::ReservationRenewed),
            serde_json::json!({ "acquired": true, "renewed": true, "reservation": reservation_body(&r) }),
        ),
        ReserveOutcome::HeldByOther(holder) => (
            StatusCode::OK,
            None,
            serde_json::json!({ "acquired": false, "holder": reservation_body(&holder) }),
        ),
    };
    if let Some(event_type) = event_type {
        state.eph.bus.publish(
            Event::new(event_type, ctx.project_id, &project.slug)
                .workspace(workspace.id, &workspace.alias)
                .data(serde_json::json!({ "path": req.path })),
        );
    }
    Ok((status, Json(body)))
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ReleaseQuery {
    #[serde(default)]
    workspace_id: Option<Uuid>,
}

/// DELETE /v1/reservations/{path} -- release by the holder; releasing a
/// reservation not held is a no-op.
pub(crate) async fn release(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<String>,
    Query(query): Query<ReleaseQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let released = state
        .eph
        .reservations
        .release(ctx.project_id, &path, workspace.id);
    if released.is_some() {
        state.eph.bus.publish(
            Event::new(EventType::ReservationReleased, ctx.project_id, &project.slug)
                .workspace(workspace.id, &workspace.alias)
                .data(serde_json::json!({ "path": path })),
        );
    }
    Ok(Json(
        serde_json::json!({ "released": released.is_some(), "path": path }),
    ))
}

/// GET /v1/reservations -- live reservations for the project.
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<bh_api_types::ReservationBody>>> {
    let live = state.eph.reservations.list(ctx.project_id, Utc::now());
    Ok(Json(live.iter().map(reservation_body).collect()))
}
