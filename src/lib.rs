// Public API for integration tests and potential library usage

pub mod api;
pub mod assistant;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod tasks;
pub mod types;
pub mod ws;

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Build the HTTP router: health, stats and the WebSocket endpoint
pub fn app(state: Arc<AppState>) -> Router {
    let cors = match state
        .config
        .cors_origin
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new().allow_origin(AllowOrigin::exact(origin)),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/", get(api::health))
        .route("/api/v1/stats", get(api::stats))
        .route("/api/v1/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
