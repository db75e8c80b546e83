use super::require_session_id;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use otasuke::chat::{TurnOutcome, TurnView};
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    prompt: String,
}

// Streams protocol lines to the page as they are produced
pub struct SseResponse {
    rx: UnboundedReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: UnboundedReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

// One line per UI operation, `<prefix>:<json>\n`
pub(crate) struct ProtocolFormatter;

impl ProtocolFormatter {
    fn encode(text: &str) -> String {
        serde_json::to_string(text).unwrap_or_else(|_| String::from("\"\""))
    }

    pub(crate) fn format_user(text: &str) -> String {
        format!("u:{}\n", Self::encode(text))
    }

    pub(crate) fn format_text(text: &str) -> String {
        format!("t:{}\n", Self::encode(text))
    }

    pub(crate) fn format_info(text: &str) -> String {
        format!("i:{}\n", Self::encode(text))
    }

    pub(crate) fn format_error(message: &str, detail: &str) -> String {
        format!("3:{}\n", json!({ "message": message, "detail": detail }))
    }

    pub(crate) fn format_finish(reason: &str) -> String {
        format!("d:{}\n", json!({ "finishReason": reason }))
    }
}

/// Renders a turn as protocol lines on a channel
pub struct ChannelView {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelView {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    fn send(&self, line: String) {
        if self.tx.send(line).is_err() {
            tracing::debug!("Client went away, dropping output");
        }
    }
}

impl TurnView for ChannelView {
    fn user_message(&mut self, content: &str) {
        self.send(ProtocolFormatter::format_user(content));
    }

    fn render_text(&mut self, text: &str) {
        self.send(ProtocolFormatter::format_text(text));
    }

    fn info(&mut self, message: &str) {
        self.send(ProtocolFormatter::format_info(message));
    }

    fn error(&mut self, message: &str, detail: &str) {
        self.send(ProtocolFormatter::format_error(message, detail));
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReplyRequest>,
) -> Result<SseResponse, StatusCode> {
    let session_id = require_session_id(&headers)?;
    if request.prompt.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let session = state
        .session(&session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let done = session
        .turn(request.prompt, Box::new(ChannelView::new(tx.clone())))
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;

    // The body ends once the view and this task have both dropped their sender
    tokio::spawn(async move {
        let reason = match done.await {
            Ok(TurnOutcome::Completed(_)) => "stop",
            Ok(TurnOutcome::Failed(_)) | Ok(TurnOutcome::Halted(_)) => "error",
            Err(_) => {
                tracing::error!("Session runtime dropped the turn");
                "error"
            }
        };
        let _ = tx.send(ProtocolFormatter::format_finish(reason));
        state.touch(&session_id).await;
    });

    Ok(SseResponse::new(UnboundedReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .with_state(state)
}
