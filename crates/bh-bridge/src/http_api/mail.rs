use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use bh_api_types::{clamp_limit, Page};
use bh_core::error::Error;

use crate::api_error::{ApiError, ApiResult};
use crate::auth::{bind_actor, AuthContext};
use crate::state::ApiState;

/// POST /v1/messages -- send mail to another workspace by alias.
pub(crate) async fn send(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<bh_api_types::MailSendRequest>,
) -> ApiResult<impl IntoResponse> {
    let from = bind_actor(&state, &ctx, req.workspace_id).await?;
    let project = state.project(ctx.project_id).await?;

    let recipients = state.db.workspaces_for_project(ctx.project_id, false).await?;
    let to = recipients
        .into_iter()
        .find(|w| w.alias == req.to_alias)
        .ok_or_else(|| ApiError(Error::NotFound(format!("no active workspace {:?}", req.to_alias))))?;

    let mail = state
        .mail
        .send(
            &project.slug,
            &from,
            &to,
            req.subject,
            req.body,
            req.priority,
            req.thread_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(mail)))
}

/// GET /v1/messages/inbox
pub(crate) async fn inbox(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<bh_api_types::InboxQuery>,
) -> ApiResult<Json<Page<bh_core::types::MailMessage>>> {
    let workspace = bind_actor(&state, &ctx, query.workspace_id).await?;
    let limit = clamp_limit(query.limit);
    let before = match &query.cursor {
        Some(raw) => Some(
            bh_api_types::cursor::decode_key(raw)
                .ok_or_else(|| ApiError(Error::Validation("invalid cursor".into())))?,
        ),
        None => None,
    };
    let (items, next) = state
        .mail
        .inbox(
            ctx.project_id,
            workspace.id,
            query.unread_only,
            before,
            limit,
        )
        .await?;
    Ok(Json(Page {
        items,
        next_cursor: next.map(|key| bh_api_types::cursor::encode_key(&key)),
    }))
}

/// POST /v1/messages/{id}/ack -- idempotent read receipt.
pub(crate) async fn ack(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<bh_core::types::MailMessage>> {
    let workspace = bind_actor(&state, &ctx, None).await?;
    let project = state.project(ctx.project_id).await?;
    let mail = state
        .mail
        .acknowledge(&project.slug, ctx.project_id, id, &workspace)
        .await?;
    Ok(Json(mail))
}
