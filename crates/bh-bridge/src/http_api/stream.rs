//! GET /v1/status/stream, the live event feed.
//!
//! One JSON event per line over a chunked response, with a keepalive
//! heartbeat line every 15 seconds. Filtering happens server-side after
//! subscription. There is no resume cursor: each event carries the
//! subscriber's `seq`, so a gap tells the client to re-read REST state.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    response::{IntoResponse, Response},
    Extension,
};
use futures_util::StreamExt;
use serde::Deserialize;

use bh_core::error::Error;
use bh_core::event::Event;

use crate::api_error::{ApiError, ApiResult};
use crate::auth::AuthContext;
use crate::state::ApiState;

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, Default, Clone)]
pub(crate) struct StreamQuery {
    #[serde(default)]
    project_slug: Option<String>,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    human_name: Option<String>,
    /// Comma-separated wire names, e.g. `bead.claimed,chat.message_sent`.
    #[serde(default)]
    event_types: Option<String>,
}

struct Filter {
    project_slug: Option<String>,
    repo: Option<String>,
    human_name: Option<String>,
    event_types: Option<Vec<String>>,
}

impl Filter {
    fn from_query(query: StreamQuery) -> Self {
        Self {
            project_slug: query.project_slug,
            repo: query.repo,
            human_name: query.human_name,
            event_types: query.event_types.map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
        }
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(slug) = &self.project_slug {
            if &event.project_slug != slug {
                return false;
            }
        }
        if let Some(repo) = &self.repo {
            if event.repo.as_deref() != Some(repo.as_str()) {
                return false;
            }
        }
        if let Some(human_name) = &self.human_name {
            if event.human_name.as_deref() != Some(human_name.as_str()) {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == event.event_type.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The stream handler. The subscription is torn down when the client goes
/// away: dropping the body drops the output channel, the forwarder task
/// exits on its next send or heartbeat, and the bus prunes the subscriber.
pub(crate) async fn stream(
    State(state): State<Arc<ApiState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let project = state.project(ctx.project_id).await?;
    if let Some(slug) = &query.project_slug {
        if slug != &project.slug {
            return Err(ApiError(Error::Forbidden(
                "stream is scoped to the authenticated project".into(),
            )));
        }
    }

    let filter = Filter::from_query(query);
    let subscriber = state.eph.bus.subscribe(ctx.project_id);
    let (out_tx, out_rx) = flume::bounded::<String>(bh_ephemeral::SUBSCRIBER_BUFFER * 2);

    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                received = subscriber.rx.recv_async() => {
                    match received {
                        Ok(event) => {
                            if !filter.matches(&event) {
                                continue;
                            }
                            let Ok(line) = serde_json::to_string(&event) else {
                                continue;
                            };
                            if out_tx.send_async(format!("{line}\n")).await.is_err() {
                                return; // client gone
                            }
                        }
                        Err(_) => return, // bus gone (shutdown)
                    }
                }
                _ = heartbeat.tick() => {
                    let line = format!(
                        "{}\n",
                        serde_json::json!({
                            "type": "heartbeat",
                            "timestamp": chrono::Utc::now(),
                        })
                    );
                    if out_tx.send_async(line).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let body = Body::from_stream(
        out_rx
            .into_stream()
            .map(|line| Ok::<_, Infallible>(line)),
    );
    Ok(([(
        axum::http::header::CONTENT_TYPE,
        "application/x-ndjson",
    )], body)
        .into_response())
}
