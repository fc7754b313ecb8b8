//! `GET /v1/sessions`: live sessions in their one-line rendering.

use axum::extract::{Json, State};
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions: Vec<String> = state
        .manager
        .active_sessions()
        .map(|s| s.to_string())
        .collect();
    sessions.sort();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
        "acquired": state.manager.sessions().iter().filter(|s| s.is_acquired()).count(),
    }))
}
