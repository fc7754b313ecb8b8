pub mod info;
pub mod sessions;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use tether_domain::config::Config;

use crate::state::AppState;
use crate::transports::{raw_websocket, send, streaming, websocket, xhr};

/// Build the full router: session endpoints mounted under
/// `server.prefix`, plus diagnostics under `/v1`.
pub fn router(config: &Config) -> Router<AppState> {
    let mut endpoint = Router::new()
        .route("/", get(info::greeting))
        .route("/info", get(info::info))
        .route("/:server/:session/xhr", post(xhr::xhr))
        .route("/:server/:session/xhr_streaming", post(streaming::xhr_streaming))
        .route(
            "/:server/:session/xhr_send",
            post(send::xhr_send).layer(DefaultBodyLimit::max(config.transport.max_body_bytes)),
        );

    if config.transport.websocket {
        endpoint = endpoint
            .route("/websocket", get(raw_websocket::raw_websocket))
            .route("/:server/:session/websocket", get(websocket::websocket));
    }

    Router::new()
        .nest(&config.server.prefix, endpoint)
        .route("/v1/sessions", get(sessions::list_sessions))
}

/// Router with state attached, ready to serve.
pub fn app(state: AppState) -> Router {
    router(&state.config).with_state(state)
}
