pub mod assistant;
pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{credential_from_request, AuthError};
use crate::registry::Connection;
use crate::state::AppState;
use crate::types::UserId;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserId, AuthError> {
    let credential =
        credential_from_request(headers, query_token).ok_or(AuthError::MissingCredential)?;
    state.identity.extract_user_id(&credential)
}

/// WebSocket upgrade handler. Unauthenticated requests get a 401 and are never upgraded.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match authenticate(&state, &headers, params.token.as_deref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket connection");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    tracing::info!(user_id = %user_id, "WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn, mut outbound) = Connection::channel(user_id, state.config.outbound_buffer);
    state.registry.register(conn.clone()).await;
    tracing::info!(
        conn_id = conn.id(),
        user_id = conn.user_id(),
        "WebSocket connected"
    );

    // The writer owns the sink; everything else queues through the connection
    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = writer_conn.closed() => break,

                msg = outbound.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = sender.send(msg).await {
                        tracing::debug!(conn_id = writer_conn.id(), error = %e, "WebSocket write failed");
                        break;
                    }
                }
            }
        }
        writer_conn.close();
        let _ = sender.close().await;
    });

    let send_timeout = state.config.send_timeout;
    loop {
        tokio::select! {
            _ = conn.closed() => break,

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(conn_id = conn.id(), "Received message: {}", text.as_str());

                        if let Some(response) =
                            handlers::handle_envelope(&state, &conn, text.as_str()).await
                        {
                            if let Err(e) = conn.send_message(&response, send_timeout).await {
                                tracing::warn!(conn_id = conn.id(), error = %e, "Failed to send response");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!(conn_id = conn.id(), "Client sent close frame");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if conn.send(Message::Pong(data), send_timeout).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(conn_id = conn.id(), error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.remove(conn.user_id(), conn.id()).await;
    conn.close();
    let _ = writer.await;

    tracing::info!(
        conn_id = conn.id(),
        user_id = conn.user_id(),
        "WebSocket connection closed"
    );
}
