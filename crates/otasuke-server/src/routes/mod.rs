// Export route modules
pub mod page;
pub mod reply;
pub mod session;

use crate::state::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::Router;

/// Header carrying the browser session id
pub const SESSION_HEADER: &str = "x-session-id";

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(page::routes())
        .merge(reply::routes(state.clone()))
        .merge(session::routes(state))
}

/// The caller's session id, if the request carries a usable one
pub(crate) fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub(crate) fn require_session_id(headers: &HeaderMap) -> Result<String, StatusCode> {
    session_id(headers).ok_or(StatusCode::BAD_REQUEST)
}
