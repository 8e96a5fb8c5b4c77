use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ConversationGate, SessionTable};
use crate::types::UserId;

/// Evict idle sessions once, skipping users with a turn in flight
pub async fn reap_idle_sessions(sessions: &SessionTable, gate: &ConversationGate) -> Vec<UserId> {
    let busy = gate.busy_users();
    let evicted = sessions.evict_idle(&busy).await;

    for user_id in &evicted {
        tracing::info!(user_id = %user_id, "Cleaned up inactive assistant session");
    }
    evicted
}

/// Spawn a background task that sweeps idle sessions every `interval` until `shutdown` is cancelled
pub fn spawn_session_reaper(
    sessions: Arc<SessionTable>,
    gate: Arc<ConversationGate>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = interval.as_secs(),
            idle_timeout_secs = sessions.idle_timeout().as_secs(),
            "Session reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    let evicted = reap_idle_sessions(&sessions, &gate).await;
                    if !evicted.is_empty() {
                        tracing::debug!(evicted = evicted.len(), "Session sweep finished");
                    }
                }
            }
        }

        tracing::info!("Session reaper stopped");
    })
}
