//! - `GET {prefix}`: greeting
//! - `GET {prefix}/info`: transport capabilities for client negotiation

use axum::extract::{Json, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::state::AppState;

pub const GREETING: &str = "Welcome to tether!\n";

pub async fn greeting() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=UTF-8")], GREETING)
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub websocket: bool,
    pub cookie_needed: bool,
    pub origins: Vec<String>,
    pub entropy: u32,
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        websocket: state.config.transport.websocket,
        cookie_needed: false,
        origins: vec!["*:*".into()],
        entropy: uuid::Uuid::new_v4().as_u128() as u32,
    })
}
