//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pollroom_core::clock::Clock;
use pollroom_core::rng::DeterministicRng;
use pollroom_core::store::KeyValueStore;
use pollroom_live::DEFAULT_FEED_CAPACITY;
use pollroom_responses::domain::answers::DEFAULT_MAX_ANSWER_LENGTH;
use pollroom_store::MemoryStore;
use pollroom_test_support::{FixedClock, SequenceRng, SequentialIds};
use tower::ServiceExt;

use pollroom_api::state::AppState;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::at(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Application state over a fresh in-memory store with deterministic
/// clock, ids and join codes (the first code is `ABCDEF`).
pub fn test_state() -> AppState {
    test_state_with(Arc::new(MemoryStore::new()))
}

/// Like [`test_state`] but over `store`.
pub fn test_state_with(store: Arc<dyn KeyValueStore>) -> AppState {
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> =
        Arc::new(Mutex::new(SequenceRng::new((0..32).collect())));
    AppState::new(
        store,
        fixed_clock(),
        rng,
        Arc::new(SequentialIds::new()),
        DEFAULT_MAX_ANSWER_LENGTH,
        DEFAULT_FEED_CAPACITY,
    )
}

/// Build the full app router. Uses the same route structure as `main.rs`.
pub fn build_test_app(state: &AppState) -> Router {
    pollroom_api::app(state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    // Empty bodies (204) and axum's plain-text rejections read as null.
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a request without a body and return the response.
pub async fn send_empty(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send_empty(app, "GET", uri).await
}

/// Creates a session and returns its id and join code.
pub async fn create_session(state: &AppState, title: &str) -> (String, String) {
    let (status, json) = post_json(
        build_test_app(state),
        "/api/v1/sessions",
        &serde_json::json!({ "title": title }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        json["session_id"].as_str().unwrap().to_owned(),
        json["code"].as_str().unwrap().to_owned(),
    )
}

/// Creates a question and returns its id.
pub async fn create_question(
    state: &AppState,
    session_id: &str,
    body: &serde_json::Value,
) -> String {
    let (status, json) = post_json(
        build_test_app(state),
        &format!("/api/v1/sessions/{session_id}/questions"),
        body,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["question_id"].as_str().unwrap().to_owned()
}

/// Publishes a question.
pub async fn publish(state: &AppState, session_id: &str, question_id: &str) {
    let (status, _) = send_empty(
        build_test_app(state),
        "POST",
        &format!("/api/v1/sessions/{session_id}/questions/{question_id}/publish"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Submits an answer and returns the response.
pub async fn submit(
    state: &AppState,
    session_id: &str,
    question_id: &str,
    participant_id: &str,
    answer: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_json(
        build_test_app(state),
        &format!("/api/v1/sessions/{session_id}/questions/{question_id}/responses"),
        &serde_json::json!({ "participant_id": participant_id, "answer": answer }),
    )
    .await
}
