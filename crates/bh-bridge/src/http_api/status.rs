use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use bh_api_types::{clamp_limit, StatusSnapshot};
use chrono::Utc;

use super::{claim_body, reservation_body, workspace_body};
use crate::api_error::ApiResult;
use crate::auth::{redact_workspace, AuthContext};
use crate::state::ApiState;

/// GET /v1/status -- one coherent snapshot: presence-merged workspaces, open
/// claims with conflict markers, live reservations, outbox depth.
pub(crate) async fn snapshot(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<StatusSnapshot>> {
    let project = state.project(ctx.project_id).await?;

    let listed = state.registry.list_with_presence(ctx.project_id).await?;
    let mut workspaces: Vec<_> = listed
        .iter()
        .map(|(ws, presence)| workspace_body(ws, Some(*presence)))
        .collect();
    for body in &mut workspaces {
        redact_workspace(&ctx, body);
    }

    let claims = state.claims.list(ctx.project_id).await?;
    let conflicts = state
        .claims
        .conflicts(ctx.project_id)
        .await?
        .into_iter()
        .map(|(bead_id, _)| bead_id)
        .collect();
    let reservations = state.eph.reservations.list(ctx.project_id, Utc::now());
    let outbox_depth = state.db.outbox_depth(ctx.project_id).await?;

    Ok(Json(StatusSnapshot {
        project_id: project.id,
        project_slug: project.slug,
        visibility: project.visibility,
        workspaces,
        claims: claims.iter().map(claim_body).collect(),
        conflicts,
        reservations: reservations.iter().map(reservation_body).collect(),
        outbox_depth,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct AuditQuery {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    cursor: Option<String>,
}

/// GET /v1/audit -- the project's append-only audit log.
pub(crate) async fn audit(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<bh_api_types::Page<bh_core::types::AuditEntry>>> {
    let limit = clamp_limit(query.limit);
    let after = match &query.cursor {
        Some(raw) => Some(bh_api_types::cursor::decode_key(raw).ok_or_else(|| {
            crate::api_error::ApiError(bh_core::Error::Validation("invalid cursor".into()))
        })?),
        None => None,
    };
    let (items, next) = state.db.audit_list(ctx.project_id, after, limit).await?;
    Ok(Json(bh_api_types::Page {
        items,
        next_cursor: next.map(|key| bh_api_types::cursor::encode_key(&key)),
    }))
}

/// GET /health -- liveness plus dependency checks. 503 while draining or
/// when the durable store is unreachable.
pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    if state.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "draining" })),
        );
    }
    let db_ok = state.db.ping().await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "database": db_ok,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        })),
    )
}
