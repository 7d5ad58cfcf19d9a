//! End-to-end chat flow over the HTTP surface: send-and-wait released by a
//! peer's send-and-leave, then an unobserved follow-up.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use bh_bridge::{api_router, ApiState};
use bh_core::config::Config;
use bh_store::Db;

async fn test_app() -> Router {
    let db = Db::open_in_memory().await.unwrap();
    api_router(Arc::new(ApiState::new(Config::for_tests(), db).unwrap()))
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn bootstrap(app: &Router, alias: &str) -> String {
    let response = app
        .clone()
        .oneshot(post(
            "/v1/init",
            None,
            serde_json::json!({
                "project_slug": "demo",
                "repo_origin": "git@github.com:acme/widgets.git",
                "alias": alias,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["api_key"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn wait_is_released_by_peer_leave_and_later_sends_are_unobserved() {
    let app = test_app().await;
    let alice_key = bootstrap(&app, "alice").await;
    let bob_key = bootstrap(&app, "bob").await;

    // Alice opens the conversation without blocking.
    let response = app
        .clone()
        .oneshot(post(
            "/v1/chat/sessions",
            Some(&alice_key),
            serde_json::json!({
                "to_aliases": ["bob"],
                "message": "can you take bd-7?",
                "start_conversation": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let opened = json_body(response).await;
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();

    // Alice blocks on a reply while bob answers with send-and-leave.
    let waiting_app = app.clone();
    let alice_key_2 = alice_key.clone();
    let session_id_2 = session_id.clone();
    let waiter = tokio::spawn(async move {
        waiting_app
            .oneshot(post(
                &format!("/v1/chat/sessions/{session_id_2}/messages"),
                Some(&alice_key_2),
                serde_json::json!({
                    "message": "ping",
                    "wait": true,
                    "wait_seconds": 5,
                }),
            ))
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/chat/sessions/{session_id}/messages"),
            Some(&bob_key),
            serde_json::json!({ "message": "ok", "leaving": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bob_send = json_body(response).await;
    // Alice is blocked on the session, so bob's message is observed.
    assert_eq!(bob_send["delivered"], true);

    let response = tokio::time::timeout(Duration::from_secs(4), waiter)
        .await
        .expect("wait did not release")
        .unwrap();
    let released = json_body(response).await;
    assert_eq!(released["release"]["kind"], "peer_left");
    assert_eq!(released["release"]["alias"], "bob");

    // Bob left and nobody is watching: a follow-up send is stored but
    // unobserved.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/chat/sessions/{session_id}/messages"),
            Some(&alice_key),
            serde_json::json!({ "message": "thanks", "wait": true, "wait_seconds": 0 }),
        ))
        .await
        .unwrap();
    let followup = json_body(response).await;
    assert_eq!(followup["delivered"], false);
    assert_eq!(followup["release"]["kind"], "deadline");

    // History keeps the whole exchange in insert order.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/v1/chat/sessions/{session_id}/messages"))
                .header("authorization", format!("Bearer {alice_key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let history = json_body(response).await;
    let bodies: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["can you take bd-7?", "ping", "ok", "thanks"]);
}

#[tokio::test]
async fn wait_times_out_without_reply() {
    let app = test_app().await;
    let alice_key = bootstrap(&app, "alice").await;
    let _bob_key = bootstrap(&app, "bob").await;

    let response = app
        .oneshot(post(
            "/v1/chat/sessions",
            Some(&alice_key),
            serde_json::json!({
                "to_aliases": ["bob"],
                "message": "anyone there?",
                "wait": true,
                "wait_seconds": 1,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["release"]["kind"], "deadline");
    assert_eq!(body["delivered"], false);
}
