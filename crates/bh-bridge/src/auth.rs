//! Identity resolution for every `/v1` request.
//!
//! Two modes, chosen by header presence in this order:
//!
//! 1. **Signed proxy**: a trusted gateway injects `X-BH-Auth:
//!    v2:{project_id}:{ptype}:{principal_id}:{actor_id}:{hex_hmac}` signed
//!    with the internal secret. Verified here; any public header the client
//!    also sent is ignored.
//! 2. **Bearer**: `Authorization: Bearer aw_sk_<token>`, hashed with
//!    SHA-256 and looked up in the key store.
//!
//! The resolved [`AuthContext`] rides on the request as an extension.
//! Actor binding and public-reader rules live here too.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use bh_core::error::{Error, Result};
use bh_core::types::{Visibility, Workspace};
use bh_engine::keys;

use crate::api_error::ApiError;
use crate::state::ApiState;

// ---------------------------------------------------------------------------
// AuthContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Proxy `u`: a dashboard user terminated at the gateway.
    User { user_id: String },
    /// Proxy `k` or bearer mode: an API key, optionally bound to one agent.
    ApiKey { agent_id: Option<Uuid> },
    /// Proxy `p`: anonymous reader of a public project.
    PublicReader,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub project_id: Uuid,
    pub principal: Principal,
    pub actor_id: Option<String>,
}

impl AuthContext {
    pub fn is_public_reader(&self) -> bool {
        self.principal == Principal::PublicReader
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Resolve the caller's identity and stash it as a request extension.
pub async fn auth_middleware(
    State(state): State<Arc<ApiState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = match resolve(&state, &request).await {
        Ok(ctx) => ctx,
        Err(err) => return ApiError(err).into_response(),
    };

    // Public readers may only read, and only public projects.
    if ctx.is_public_reader() {
        let readable = match state.db.project_by_id(ctx.project_id).await {
            Ok(Some(project)) => {
                project.deleted_at.is_none() && project.visibility == Visibility::Public
            }
            _ => false,
        };
        if !readable {
            return ApiError(Error::Forbidden("project is not public".into())).into_response();
        }
        if request.method() != axum::http::Method::GET {
            return ApiError(Error::Forbidden("public readers cannot write".into()))
                .into_response();
        }
    }

    // Presence: every authenticated write from an agent-bound key refreshes
    // last-seen.
    if request.method() != axum::http::Method::GET {
        if let Principal::ApiKey {
            agent_id: Some(agent_id),
        } = ctx.principal
        {
            if let Err(e) = state.registry.touch(ctx.project_id, agent_id).await {
                tracing::warn!(error = %e, "presence touch failed");
            }
        }
    }

    request.extensions_mut().insert(ctx);
    next.run(request).await
}

async fn resolve(state: &ApiState, request: &Request<Body>) -> Result<AuthContext> {
    if let Some(header) = request.headers().get("x-bh-auth") {
        let raw = header
            .to_str()
            .map_err(|_| Error::Unauthenticated("malformed X-BH-Auth header".into()))?;
        let secret = state
            .config
            .proxy_secret()
            .ok_or_else(|| Error::Unauthenticated("proxy auth is not enabled".into()))?;
        return resolve_proxy(state, secret, raw).await;
    }

    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthenticated("missing credentials".into()))?;
    resolve_bearer(state, bearer).await
}

/// `v2:{project_id}:{ptype}:{principal_id}:{actor_id}:{hex_hmac}`
async fn resolve_proxy(state: &ApiState, secret: &str, raw: &str) -> Result<AuthContext> {
    let (context, mac) = raw
        .rsplit_once(':')
        .ok_or_else(|| Error::Unauthenticated("malformed proxy context".into()))?;
    if !keys::verify_proxy_context(secret, context, mac) {
        return Err(Error::Unauthenticated("invalid proxy signature".into()));
    }

    let parts: Vec<&str> = context.split(':').collect();
    let [version, project_id, ptype, principal_id, actor_id] = parts.as_slice() else {
        return Err(Error::Unauthenticated("malformed proxy context".into()));
    };
    if *version != "v2" {
        return Err(Error::Unauthenticated("unsupported proxy version".into()));
    }
    let project_id = Uuid::parse_str(project_id)
        .map_err(|_| Error::Unauthenticated("malformed proxy project id".into()))?;

    // Key valid but project gone: distinct from bad credentials.
    state
        .db
        .project_by_id(project_id)
        .await?
        .filter(|p| p.deleted_at.is_none())
        .ok_or_else(|| Error::NotFound("project not found".into()))?;

    let principal = match *ptype {
        "u" => Principal::User {
            user_id: principal_id.to_string(),
        },
        "k" => Principal::ApiKey {
            agent_id: Uuid::parse_str(actor_id).ok(),
        },
        "p" => Principal::PublicReader,
        _ => return Err(Error::Unauthenticated("unknown principal type".into())),
    };

    Ok(AuthContext {
        project_id,
        principal,
        actor_id: (!actor_id.is_empty()).then(|| actor_id.to_string()),
    })
}

async fn resolve_bearer(state: &ApiState, token: &str) -> Result<AuthContext> {
    if !token.starts_with(keys::KEY_PREFIX) {
        return Err(Error::Unauthenticated("invalid key format".into()));
    }
    let resolved = state
        .db
        .api_key_by_hash(keys::hash_key(token))
        .await?
        .ok_or_else(|| Error::Unauthenticated("unknown key".into()))?;

    state
        .db
        .project_by_id(resolved.project_id)
        .await?
        .filter(|p| p.deleted_at.is_none())
        .ok_or_else(|| Error::NotFound("project not found".into()))?;

    Ok(AuthContext {
        project_id: resolved.project_id,
        principal: Principal::ApiKey {
            agent_id: resolved.agent_id,
        },
        actor_id: resolved.agent_id.map(|id| id.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Actor binding
// ---------------------------------------------------------------------------

/// Resolve the workspace a write acts as, enforcing actor binding: an
/// agent-bound key may only act as its own workspace; project-scoped keys
/// (proxy-mode internal traffic) may name any workspace in the project.
pub async fn bind_actor(
    state: &ApiState,
    ctx: &AuthContext,
    body_workspace_id: Option<Uuid>,
) -> Result<Workspace> {
    let workspace_id = match (&ctx.principal, body_workspace_id) {
        (Principal::PublicReader, _) => {
            return Err(Error::Forbidden("public readers cannot act".into()));
        }
        (
            Principal::ApiKey {
                agent_id: Some(agent_id),
            },
            named,
        ) => {
            if let Some(named) = named {
                if named != *agent_id {
                    return Err(Error::Forbidden(
                        "workspace_id does not match the authenticated agent".into(),
                    ));
                }
            }
            *agent_id
        }
        (Principal::ApiKey { agent_id: None }, Some(named)) => named,
        (Principal::ApiKey { agent_id: None }, None) => {
            return Err(Error::Validation(
                "workspace_id is required with a project-scoped key".into(),
            ));
        }
        (Principal::User { .. }, Some(named)) => named,
        (Principal::User { .. }, None) => {
            return Err(Error::Validation(
                "workspace_id is required for dashboard users".into(),
            ));
        }
    };

    let workspace = state
        .db
        .workspace_by_id(workspace_id)
        .await?
        .ok_or_else(|| Error::NotFound("workspace not found".into()))?;
    if workspace.project_id != ctx.project_id {
        return Err(Error::Forbidden("workspace is in another project".into()));
    }
    if workspace.is_deleted() {
        return Err(Error::Forbidden("workspace is deleted".into()));
    }
    Ok(workspace)
}

/// Strip PII for public readers: `alias` may be shown, `human_name` must
/// not.
pub fn redact_workspace(ctx: &AuthContext, body: &mut bh_api_types::WorkspaceBody) {
    if ctx.is_public_reader() {
        body.human_name = None;
        body.host = None;
        body.path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_context_shape_is_parsed() {
        // Pure parsing pieces exercised without a store: the signature path
        // is covered in bh-engine::keys, the end-to-end path in the router
        // tests.
        let raw = "v2:7aa0f48e-0b7a-4b48-9d12-5a3a7a1b8e9f:k:key-1:actor-1:deadbeef";
        let (context, mac) = raw.rsplit_once(':').unwrap();
        assert_eq!(mac, "deadbeef");
        assert_eq!(context.split(':').count(), 5);
    }
}
