//! WebSocket message dispatch

use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::Connection;
use crate::state::AppState;
use std::sync::Arc;

use super::assistant;

/// Decode one text frame and dispatch it. Returns the direct reply, if any.
pub async fn handle_envelope(
    state: &Arc<AppState>,
    conn: &Arc<Connection>,
    text: &str,
) -> Option<ServerMessage> {
    match ClientMessage::decode(text) {
        Ok(msg) => handle_message(msg, state, conn).await,
        Err(e) => {
            tracing::warn!(
                conn_id = conn.id(),
                user_id = conn.user_id(),
                error = %e,
                "Rejected client message"
            );
            Some(ServerMessage::error(e.code(), e.to_string()))
        }
    }
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    state: &Arc<AppState>,
    conn: &Arc<Connection>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Chat { payload } => {
            tracing::info!(user_id = conn.user_id(), %payload, "Chat message received");
            None
        }

        ClientMessage::AiRequest(request) => {
            assistant::handle_ai_request(state, conn, request.message).await
        }
    }
}
