use crate::protocol::ServerMessage;
use crate::registry::{Connection, ConnectionRegistry};
use axum::extract::ws::{Message, Utf8Bytes};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fans server messages out to every registered connection
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

/// Handles for the per-connection sends scheduled by one broadcast.
/// Dropping it detaches the sends; they still run to completion.
#[derive(Debug, Default)]
pub struct FanOut {
    deliveries: Vec<JoinHandle<bool>>,
}

impl FanOut {
    /// Number of delivery attempts that were scheduled
    pub fn attempts(&self) -> usize {
        self.deliveries.len()
    }

    /// Wait for every send and return how many succeeded
    pub async fn delivered(self) -> usize {
        futures::future::join_all(self.deliveries)
            .await
            .into_iter()
            .filter(|result| matches!(result, Ok(true)))
            .count()
    }
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Serialize `msg` once and schedule a send to every connection.
    ///
    /// Returns as soon as the sends are spawned. A failed send closes and
    /// deregisters that connection only.
    pub async fn broadcast(&self, msg: &ServerMessage) -> FanOut {
        let text: Utf8Bytes = match serde_json::to_string(msg) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                return FanOut::default();
            }
        };

        let targets = self.registry.snapshot().await;
        tracing::debug!(recipients = targets.len(), "Broadcasting to all connections");

        let deliveries = targets
            .into_iter()
            .map(|connection| {
                let registry = self.registry.clone();
                let msg = Message::Text(text.clone());
                let timeout = self.send_timeout;
                tokio::spawn(deliver(registry, connection, msg, timeout))
            })
            .collect();

        FanOut { deliveries }
    }
}

async fn deliver(
    registry: Arc<ConnectionRegistry>,
    connection: Arc<Connection>,
    msg: Message,
    timeout: Duration,
) -> bool {
    match connection.send(msg, timeout).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                conn_id = connection.id(),
                user_id = connection.user_id(),
                error = %e,
                "Broadcast send failed, dropping connection"
            );
            connection.close();
            registry
                .remove(connection.user_id(), connection.id())
                .await;
            false
        }
    }
}
