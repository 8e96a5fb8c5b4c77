//! Live WebSocket connections grouped by user.
//!
//! The registry only does bookkeeping. Each connection's socket is owned by its
//! handler task; the registry holds the outbound queue and a close signal.

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::RwLock;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One client connection, tagged with its user
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(user_id: UserId, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id,
            tx,
            closed: CancellationToken::new(),
        }
    }

    /// Create a connection together with the receiving end of its outbound queue
    pub fn channel(user_id: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(user_id, tx)), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a frame for the writer, waiting at most `timeout` for queue space
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.tx
            .send_timeout(msg, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::Timeout(timeout),
                SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }

    pub async fn send_message(
        &self,
        msg: &ServerMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let json = serde_json::to_string(msg)?;
        self.send(Message::Text(json.into()), timeout).await
    }

    /// Signal the handler to tear the socket down
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once `close` has been called
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

/// User id -> that user's open connections, in registration order
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, Vec<Arc<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Arc<Connection>) {
        let mut users = self.users.write().await;
        users
            .entry(connection.user_id.clone())
            .or_default()
            .push(connection);
    }

    /// Remove one connection; the user entry goes away with its last connection.
    /// Returns false if the connection was not registered.
    pub async fn remove(&self, user_id: &str, connection_id: &str) -> bool {
        let mut users = self.users.write().await;
        let Some(connections) = users.get_mut(user_id) else {
            return false;
        };

        let before = connections.len();
        connections.retain(|c| c.id != connection_id);
        let removed = connections.len() != before;

        if connections.is_empty() {
            users.remove(user_id);
        }
        removed
    }

    /// Every registered connection at this instant
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.users
            .read()
            .await
            .values()
            .flat_map(|connections| connections.iter().cloned())
            .collect()
    }

    pub async fn connections_for(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(Vec::len).sum()
    }
}
