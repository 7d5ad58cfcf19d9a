// ---------------------------------------------------------------------------
// HTTP API module directory
// ---------------------------------------------------------------------------
//
// One sub-module per domain surface; this file wires them into the `/v1`
// router and owns the middleware stack.

mod chat;
mod claims;
mod dashboard;
mod escalations;
mod issues;
mod mail;
mod policies;
mod repos;
mod reservations;
mod status;
mod stream;
mod subscriptions;
mod sync;
mod workspaces;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use bh_telemetry::middleware::{metrics_middleware, request_id_middleware};

use crate::auth::auth_middleware;
use crate::state::ApiState;

use bh_core::types::{PresenceState, Workspace};

/// Render a workspace for the wire, optionally with its presence state.
pub(crate) fn workspace_body(
    ws: &Workspace,
    presence: Option<PresenceState>,
) -> bh_api_types::WorkspaceBody {
    bh_api_types::WorkspaceBody {
        id: ws.id,
        project_id: ws.project_id,
        repo_id: ws.repo_id,
        kind: ws.kind,
        alias: ws.alias.clone(),
        human_name: ws.human_name.clone(),
        role: ws.role.clone(),
        current_branch: ws.current_branch.clone(),
        focus: ws.focus.clone(),
        host: ws.host.clone(),
        path: ws.path.clone(),
        timezone: ws.timezone.clone(),
        created_at: ws.created_at,
        deleted_at: ws.deleted_at,
        last_seen_at: ws.last_seen_at,
        presence,
    }
}

pub(crate) fn claim_body(claim: &bh_core::types::Claim) -> bh_api_types::ClaimBody {
    bh_api_types::ClaimBody {
        bead_id: claim.bead_id.clone(),
        workspace_id: claim.workspace_id,
        alias: claim.alias.clone(),
        human_name: claim.human_name.clone(),
        apex: claim.apex.clone(),
        claimed_at: claim.claimed_at,
    }
}

pub(crate) fn reservation_body(
    r: &bh_core::types::Reservation,
) -> bh_api_types::ReservationBody {
    bh_api_types::ReservationBody {
        path: r.path.clone(),
        workspace_id: r.workspace_id,
        alias: r.alias.clone(),
        acquired_at: r.acquired_at,
        expires_at: r.expires_at,
        reason: r.reason.clone(),
    }
}

/// Build the full `/v1` router plus `/health`.
///
/// `/v1/init` and `/health` sit outside the auth layer; everything else
/// resolves an identity first.
pub fn api_router(state: Arc<ApiState>) -> Router {
    let authed: Router<Arc<ApiState>> = Router::new()
        // Workspaces
        .route("/v1/workspaces/register", post(workspaces::register))
        .route("/v1/workspaces", get(workspaces::list))
        .route("/v1/workspaces/{id}", get(workspaces::get_one))
        .route("/v1/workspaces/{id}", patch(workspaces::update))
        .route("/v1/workspaces/{id}", delete(workspaces::soft_delete))
        .route("/v1/workspaces/{id}/restore", post(workspaces::restore))
        // Repos
        .route("/v1/repos", get(repos::list))
        .route("/v1/repos", post(repos::create))
        .route("/v1/repos/{id}", delete(repos::soft_delete))
        // Sync + pre-flight
        .route("/v1/bdh/sync", post(sync::sync))
        .route("/v1/bdh/check", post(sync::check))
        // Issues
        .route("/v1/beads/issues", get(issues::list))
        .route("/v1/beads/issues/{bead_id}", get(issues::get_one))
        .route("/v1/beads/ready", get(issues::ready))
        // Claims
        .route("/v1/claims", get(claims::list))
        .route("/v1/claims", post(claims::acquire))
        .route("/v1/claims/release", post(claims::release))
        // Status + stream
        .route("/v1/status", get(status::snapshot))
        .route("/v1/status/stream", get(stream::stream))
        // Mail
        .route("/v1/messages", post(mail::send))
        .route("/v1/messages/inbox", get(mail::inbox))
        .route("/v1/messages/{id}/ack", post(mail::ack))
        // Chat
        .route("/v1/chat/sessions", post(chat::start))
        .route("/v1/chat/sessions", get(chat::list_sessions))
        .route("/v1/chat/sessions/{id}/messages", post(chat::send))
        .route("/v1/chat/sessions/{id}/messages", get(chat::history))
        .route("/v1/chat/pending", get(chat::pending))
        .route("/v1/chat/sessions/{id}/extend-wait", post(chat::extend_wait))
        .route("/v1/chat/admin/sessions", get(chat::admin_sessions))
        .route("/v1/chat/admin/sessions/{id}/join", post(chat::admin_join))
        .route(
            "/v1/chat/admin/sessions/{id}/messages",
            get(chat::admin_history),
        )
        // Reservations
        .route("/v1/reservations", post(reservations::reserve))
        .route("/v1/reservations", get(reservations::list))
        .route("/v1/reservations/{*path}", delete(reservations::release))
        // Policies
        .route("/v1/policies/active", get(policies::active))
        .route("/v1/policies/history", get(policies::history))
        .route("/v1/policies/{id}", get(policies::get_one))
        .route("/v1/policies", post(policies::create))
        .route("/v1/policies/{id}/activate", post(policies::activate))
        .route("/v1/policies/reset", post(policies::reset))
        .route("/v1/policies/reload-defaults", post(policies::reload_defaults))
        // Escalations
        .route("/v1/escalations", post(escalations::create))
        .route("/v1/escalations", get(escalations::list))
        .route("/v1/escalations/{id}", get(escalations::get_one))
        .route("/v1/escalations/{id}/respond", post(escalations::respond))
        // Subscriptions
        .route("/v1/subscriptions", post(subscriptions::create))
        .route("/v1/subscriptions", get(subscriptions::list))
        .route("/v1/subscriptions/{id}", delete(subscriptions::remove))
        // Audit
        .route("/v1/audit", get(status::audit))
        // Dashboard bootstrap
        .route("/v1/dashboard/config", get(dashboard::config))
        .route("/v1/dashboard/identity", post(dashboard::identity))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/v1/init", post(workspaces::init))
        .route("/health", get(status::health))
        .merge(authed)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
