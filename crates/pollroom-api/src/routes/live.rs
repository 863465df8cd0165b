//! Server-Sent Events stream of a session's live state.
//!
//! A client first receives a snapshot (the session and, if a question is
//! live, its results) and then every notification the change feed fans out.
//! The stream ends after `session_deleted`.

use std::convert::Infallible;
use std::future;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use pollroom_live::Notification;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Interval between keep-alive comments on an idle stream.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn event_name(notification: &Notification) -> &'static str {
    match notification {
        Notification::SessionChanged { .. } => "session_changed",
        Notification::ResultsChanged { .. } => "results_changed",
        Notification::SessionDeleted { .. } => "session_deleted",
    }
}

fn to_event(notification: &Notification) -> Event {
    Event::default()
        .event(event_name(notification))
        .json_data(notification)
        .unwrap_or_else(|_| Event::default().event("error").data("unserializable notification"))
}

/// GET /sessions/{session_id}/stream
#[instrument(skip(state))]
async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (snapshot, rx) = state.feed.open(session_id).await?;

    // Every notification is a full snapshot, so skipping lagged ones only
    // drops states that newer notifications supersede.
    let live = BroadcastStream::new(rx).filter_map(move |result| {
        future::ready(match result {
            Ok(notification) => Some(notification),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(%session_id, skipped, "live subscriber lagged");
                None
            }
        })
    });

    let notifications = Box::pin(stream::iter(snapshot).chain(live));
    let events = stream::unfold((notifications, false), |(mut notifications, ended)| async move {
        if ended {
            return None;
        }
        let notification = notifications.next().await?;
        let ended = matches!(notification, Notification::SessionDeleted { .. });
        Some((Ok(to_event(&notification)), (notifications, ended)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")))
}

/// Returns the router for live streams.
pub fn router() -> Router<AppState> {
    Router::new().route("/{session_id}/stream", get(stream_session))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tokio::time::timeout;
    use tower::ServiceExt;

    use crate::routes::test_support::{body_json, empty_request, json_request, test_app_state};
    use crate::routes::{questions, sessions};
    use crate::state::AppState;

    fn app(state: &AppState) -> Router {
        sessions::router()
            .merge(questions::router())
            .merge(router())
            .with_state(state.clone())
    }

    async fn create_session(state: &AppState) -> String {
        let response = app(state)
            .oneshot(json_request("POST", "/", &json!({ "title": "Live" })))
            .await
            .unwrap();
        body_json(response).await["session_id"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    /// Reads SSE frames until one contains `needle`.
    async fn read_until(body: &mut Body, needle: &str) -> String {
        timeout(Duration::from_secs(2), async {
            loop {
                let frame = body.frame().await.unwrap().unwrap();
                if let Ok(data) = frame.into_data() {
                    let text = String::from_utf8(data.to_vec()).unwrap();
                    if text.contains(needle) {
                        return text;
                    }
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_of_unknown_session_returns_404() {
        let state = test_app_state();

        let response = app(&state)
            .oneshot(empty_request("GET", &format!("/{}/stream", Uuid::new_v4())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_starts_with_snapshot() {
        // Arrange
        let state = test_app_state();
        let session_id = create_session(&state).await;

        // Act
        let response = app(&state)
            .oneshot(empty_request("GET", &format!("/{session_id}/stream")))
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let mut body = response.into_body();
        let first = read_until(&mut body, "event: session_changed").await;
        assert!(first.contains(&session_id));
        assert!(first.contains("\"status\":\"open\""));
    }

    #[tokio::test]
    async fn test_stream_pushes_publish_and_ends_on_delete() {
        // Arrange
        let state = test_app_state();
        let _relay = state.feed.spawn();
        let session_id = create_session(&state).await;
        let created = app(&state)
            .oneshot(json_request(
                "POST",
                &format!("/{session_id}/questions"),
                &json!({ "kind": "poll", "text": "Tabs?", "options": ["yes", "no"] }),
            ))
            .await
            .unwrap();
        let question_id = body_json(created).await["question_id"]
            .as_str()
            .unwrap()
            .to_owned();
        let response = app(&state)
            .oneshot(empty_request("GET", &format!("/{session_id}/stream")))
            .await
            .unwrap();
        let mut body = response.into_body();
        read_until(&mut body, "event: session_changed").await;

        // Act
        app(&state)
            .oneshot(empty_request(
                "POST",
                &format!("/{session_id}/questions/{question_id}/publish"),
            ))
            .await
            .unwrap();
        let published = read_until(&mut body, "question_live").await;
        app(&state)
            .oneshot(empty_request("DELETE", &format!("/{session_id}")))
            .await
            .unwrap();
        let deleted = read_until(&mut body, "event: session_deleted").await;

        // Assert
        assert!(published.contains(&question_id));
        assert!(deleted.contains(&session_id));
        let end = timeout(Duration::from_secs(2), body.frame()).await.unwrap();
        assert!(end.is_none());
    }
}
