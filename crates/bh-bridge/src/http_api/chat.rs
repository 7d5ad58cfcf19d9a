use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use bh_messaging::{SendOutcome, StartOutcome, WaitMode};

use crate::api_error::ApiResult;
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

fn wait_mode(wait: bool, seconds: Option<i64>, start_conversation: bool) -> WaitMode {
    if wait {
        WaitMode::Wait {
            seconds,
            start_conversation,
        }
    } else {
        WaitMode::None
    }
}

/// POST /v1/chat/sessions -- open (or re-open) a session and send the first
/// message. With `wait`, the response blocks until a reply, a leave, or the
/// deadline.
pub(crate) async fn start(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::ChatStartRequest>,
) -> ApiResult<impl IntoResponse> {
    let from = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let StartOutcome {
        session,
        initial_message_id,
        delivered,
        release,
    } = state
        .chat
        .start(
            &project.slug,
            &from,
            req.to_aliases,
            req.message,
            wait_mode(req.wait, req.wait_seconds, req.start_conversation),
            req.leaving,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session": session,
            "initial_message_id": initial_message_id,
            "delivered": delivered,
            "release": release,
            "sse_url": format!("/v1/status/stream?project_slug={}", project.slug),
        })),
    ))
}

/// POST /v1/chat/sessions/{id}/messages
pub(crate) async fn send(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<bh_api_types::ChatSendRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let from = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let SendOutcome {
        message_id,
        delivered,
        release,
    } = state
        .chat
        .send(
            &project.slug,
            id,
            &from,
            req.message,
            wait_mode(req.wait, req.wait_seconds, req.start_conversation),
            req.leaving,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "message_id": message_id,
        "delivered": delivered,
        "release": release,
    })))
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct SessionQuery {
    #[serde(default)]
    workspace_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<u32>,
}

/// GET /v1/chat/sessions -- sessions the caller participates in.
pub(crate) async fn list_sessions(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<bh_core::types::ChatSession>>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    let sessions = state.chat.sessions_for(ctx.project_id, workspace.id).await?;
    Ok(Json(sessions))
}

/// GET /v1/chat/sessions/{id}/messages
pub(crate) async fn history(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<bh_core::types::ChatMessage>>> {
    let viewer = bind_actor(&state, &ctx, query.workspace_id).await?;
    let limit = bh_api_types::clamp_limit(query.limit);
    let messages = state.chat.history(id, &viewer, limit).await?;
    Ok(Json(messages))
}

/// GET /v1/chat/pending -- sessions holding unanswered messages for the
/// caller.
pub(crate) async fn pending(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    let pending = state.chat.pending(ctx.project_id, workspace.id).await?;
    let items: Vec<serde_json::Value> = pending
        .into_iter()
        .map(|(session, latest)| {
            serde_json::json!({ "session": session, "latest_message": latest })
        })
        .collect();
    Ok(Json(serde_json::json!({ "pending": items })))
}

/// POST /v1/chat/sessions/{id}/extend-wait -- push the caller's deadline
/// out, capped at ten minutes total.
pub(crate) async fn extend_wait(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<bh_api_types::ExtendWaitRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = bind_actor(&state, &ctx, req.workspace_id).await?;
    let deadline = state.chat.extend_wait(id, workspace.id, req.seconds).await?;
    Ok(Json(serde_json::json!({ "deadline": deadline })))
}

/// GET /v1/chat/admin/sessions -- every session in the project (dashboard).
pub(crate) async fn admin_sessions(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<bh_core::types::ChatSession>>> {
    let sessions = state.chat.admin_sessions(ctx.project_id).await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminJoinRequest {
    pub workspace_id: Uuid,
}

/// POST /v1/chat/admin/sessions/{id}/join -- idempotent observer join.
pub(crate) async fn admin_join(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdminJoinRequest>,
) -> ApiResult<Json<bh_core::types::ChatSession>> {
    let observer = bind_actor(&state, &ctx, Some(req.workspace_id)).await?;
    let session = state.chat.admin_join(ctx.project_id, id, &observer).await?;
    Ok(Json(session))
}

/// GET /v1/chat/admin/sessions/{id}/messages
pub(crate) async fn admin_history(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<bh_core::types::ChatMessage>>> {
    let limit = bh_api_types::clamp_limit(query.limit);
    let messages = state.chat.admin_history(ctx.project_id, id, limit).await?;
    Ok(Json(messages))
}
