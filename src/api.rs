//! HTTP endpoints next to the WebSocket.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Live counters for operators
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsResponse {
    pub connected_users: usize,
    pub connections: usize,
    pub sessions: usize,
    pub in_flight_turns: usize,
    pub assistant: Option<String>,
}

/// GET /
pub async fn health() -> &'static str {
    "Health check"
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connected_users: state.registry.user_count().await,
        connections: state.registry.connection_count().await,
        sessions: state.sessions.len().await,
        in_flight_turns: state.gate.in_flight_count(),
        assistant: state.assistant.as_ref().map(|a| a.name().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtAuth;
    use crate::config::ServerConfig;
    use crate::registry::Connection;
    use crate::tasks::InMemoryTaskStore;
    use axum::{body::Body, http::Request, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/", get(health))
            .route("/api/v1/stats", get(stats))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_health() {
        let state = Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(JwtAuth::new(b"secret")),
            None,
            Arc::new(InMemoryTaskStore::new()),
        ));

        let response = app(state)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Health check");
    }

    #[tokio::test]
    async fn test_stats_counts_connections() {
        let state = Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(JwtAuth::new(b"secret")),
            None,
            Arc::new(InMemoryTaskStore::new()),
        ));
        let (a1, _rx1) = Connection::channel("alice".to_string(), 8);
        let (a2, _rx2) = Connection::channel("alice".to_string(), 8);
        state.registry.register(a1).await;
        state.registry.register(a2).await;
        let _guard = state.gate.try_enter("alice").unwrap();

        let response = app(state)
            .oneshot(Request::get("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            stats,
            serde_json::json!({
                "connected_users": 1,
                "connections": 2,
                "sessions": 0,
                "in_flight_turns": 1,
                "assistant": null,
            })
        );
    }
}
