use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use bh_api_types::{clamp_limit, cursor, Page};
use bh_core::error::Error;
use bh_store::IssueFilter;

use crate::api_error::{ApiError, ApiResult};
use crate::auth::AuthContext;
use crate::state::ApiState;

#[derive(Debug, Deserialize, Default)]
pub(crate) struct IssueQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    cursor: Option<String>,
}

/// GET /v1/beads/issues -- filtered, cursor-paginated issue listing.
pub(crate) async fn list(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<IssueQuery>,
) -> ApiResult<Json<Page<bh_core::types::Issue>>> {
    let limit = clamp_limit(query.limit);
    let after = match &query.cursor {
        Some(raw) => Some(
            cursor::decode_key(raw)
                .ok_or_else(|| ApiError(Error::Validation("invalid cursor".into())))?,
        ),
        None => None,
    };
    let page = state
        .db
        .list_issues(
            ctx.project_id,
            IssueFilter {
                status: query.status,
                assignee: query.assignee,
                label: query.label,
                q: query.q,
            },
            after,
            limit,
        )
        .await?;
    Ok(Json(Page {
        items: page.items,
        next_cursor: page.next_after.map(|key| cursor::encode_key(&key)),
    }))
}

/// GET /v1/beads/issues/{bead_id}
pub(crate) async fn get_one(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bead_id): Path<String>,
) -> ApiResult<Json<bh_core::types::Issue>> {
    let issue = state
        .db
        .issue_by_id(ctx.project_id, bead_id)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound("bead not found".into())))?;
    Ok(Json(issue))
}

/// GET /v1/beads/ready -- open beads whose transitive blockers are all
/// settled; cycles count as blocked.
pub(crate) async fn ready(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let ready = bh_engine::ready::ready_beads(&state.db, ctx.project_id).await?;
    Ok(Json(serde_json::json!({ "ready": ready })))
}
