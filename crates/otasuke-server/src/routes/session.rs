use super::{require_session_id, session_id};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use otasuke::chat::{ChatMessage, SessionState};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize)]
struct MessagesResponse {
    session_id: String,
    messages: Vec<ChatMessage>,
    state: SessionState,
    halted: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// Transcript for the caller's session. A request without a session id, or
// with one this server no longer holds, is issued a new one.
async fn messages(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let existing = match session_id(&headers) {
        Some(id) => state.session(&id).await.map(|handle| (id, handle)),
        None => None,
    };
    let (id, handle) = match existing {
        Some(found) => found,
        None => match state.open_session().await {
            Some(opened) => opened,
            None => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorResponse {
                        error: "Too many active sessions".to_string(),
                    }),
                )
                    .into_response()
            }
        },
    };

    match handle.snapshot().await {
        Some(snapshot) => (
            StatusCode::OK,
            Json(MessagesResponse {
                session_id: id,
                messages: snapshot.messages,
                state: snapshot.state,
                halted: snapshot.halted,
            }),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: format!("Session '{}' is not running", id),
            }),
        )
            .into_response(),
    }
}

async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let id = require_session_id(&headers)?;
    let existed = state.end_session(&id).await;
    let remaining = state.session_count().await;
    tracing::info!(
        session = %id,
        existed,
        remaining,
        "Session reset"
    );
    Ok(Json(json!({ "status": "success" })))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(messages))
        .route("/reset", post(reset))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::reply;
    use crate::configuration::SessionSettings;
    use crate::routes::test_support::{app_state, ScriptedFactory};
    use axum::body::Body;
    use std::time::Duration;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        routes(state.clone()).merge(reply::routes(state))
    }

    async fn get_messages(app: &Router, session: Option<&str>) -> MessagesResponse {
        let mut builder = Request::builder().uri("/messages").method("GET");
        if let Some(session) = session {
            builder = builder.header("x-session-id", session);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send(app: &Router, uri: &str, session: &str, body: Body) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .method("POST")
            .header("x-session-id", session)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        // drain the body so the turn completes
        let _ = response.into_body().collect().await.unwrap();
        status
    }

    #[tokio::test]
    async fn test_new_session_is_issued_an_id() {
        let state = app_state(ScriptedFactory::replies(&[]));
        let app = app(state.clone());
        let response = get_messages(&app, None).await;
        assert!(uuid::Uuid::parse_str(&response.session_id).is_ok());
        assert!(response.messages.is_empty());
        assert_eq!(response.state, SessionState::Empty);
        assert_eq!(response.halted, None);

        // the issued id keeps resolving to the same session
        let again = get_messages(&app, Some(&response.session_id)).await;
        assert_eq!(again.session_id, response.session_id);
        assert_eq!(state.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_replaced() {
        let state = app_state(ScriptedFactory::replies(&[]));
        let app = app(state.clone());
        let response = get_messages(&app, Some("chosen-by-client")).await;
        assert_ne!(response.session_id, "chosen-by-client");
        assert!(state.session("chosen-by-client").await.is_none());
    }

    #[tokio::test]
    async fn test_anonymous_requests_are_capped() {
        let state = AppState::new(
            ScriptedFactory::replies(&[]),
            &SessionSettings {
                max_sessions: 3,
                ..SessionSettings::default()
            },
        );
        let app = app(state.clone());
        for _ in 0..3 {
            get_messages(&app, None).await;
        }

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/messages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.session_count().await, 3);

        // idle sessions make room again
        assert_eq!(state.remove_idle(Duration::ZERO).await, 3);
        assert!(get_messages(&app, None).await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_transcript_and_reset() {
        let state = app_state(ScriptedFactory::replies(&["AWSはクラウドです"]));
        let app = app(state.clone());
        let s1 = get_messages(&app, None).await.session_id;
        let s2 = get_messages(&app, None).await.session_id;

        let status = send(
            &app,
            "/reply",
            &s1,
            Body::from(json!({"prompt": "AWSの使い方を教えて"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let response = get_messages(&app, Some(&s1)).await;
        assert_eq!(
            response.messages,
            vec![
                ChatMessage::user("AWSの使い方を教えて"),
                ChatMessage::assistant("AWSはクラウドです"),
            ]
        );
        assert_eq!(response.state, SessionState::Idle);

        // sessions do not see each other
        assert!(get_messages(&app, Some(&s2)).await.messages.is_empty());

        assert_eq!(send(&app, "/reset", &s1, Body::empty()).await, StatusCode::OK);
        assert_eq!(state.session_count().await, 1);

        let fresh = get_messages(&app, Some(&s1)).await;
        assert_ne!(fresh.session_id, s1);
        assert!(fresh.messages.is_empty());
    }

    #[tokio::test]
    async fn test_halted_session() {
        let app = app(app_state(ScriptedFactory::failing("invalid token")));
        let response = get_messages(&app, None).await;
        assert_eq!(response.state, SessionState::Halted);
        assert_eq!(
            response.halted.as_deref(),
            Some("エージェントの初期化に失敗しました: invalid token")
        );
    }
}
