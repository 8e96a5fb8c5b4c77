//! Per-user assistant sessions with idle expiry.

mod gate;
mod reaper;

pub use gate::{ConversationGate, GateGuard};
pub use reaper::{reap_idle_sessions, spawn_session_reaper};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::assistant::{Assistant, Conversation};
use crate::types::{SessionId, UserId};

/// Sessions idle longer than this are replaced on lookup and evicted by the reaper
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often the reaper sweeps the table
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub type SharedConversation = Arc<Mutex<Box<dyn Conversation>>>;

/// A user's conversation with the assistant
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    conversation: SharedConversation,
    last_active: Instant,
}

impl Session {
    fn start(user_id: &str, conversation: Box<dyn Conversation>, now: Instant) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            conversation: Arc::new(Mutex::new(conversation)),
            last_active: now,
        }
    }

    pub fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("last_active", &self.last_active)
            .finish_non_exhaustive()
    }
}

/// User id -> at most one live session
pub struct SessionTable {
    sessions: RwLock<HashMap<UserId, Session>>,
    idle_timeout: Duration,
}

impl SessionTable {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Return the user's live session, or replace a missing/expired one with a
    /// fresh conversation. Either way the session's activity is refreshed.
    pub async fn get_or_create(&self, user_id: &str, assistant: &dyn Assistant) -> Session {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(session) = sessions.get_mut(user_id) {
            if session.idle_for(now) < self.idle_timeout {
                session.last_active = now;
                return session.clone();
            }
            tracing::debug!(
                user_id,
                session_id = %session.id,
                "Session expired, starting a new conversation"
            );
        }

        let session = Session::start(user_id, assistant.start_conversation(user_id), now);
        tracing::info!(user_id, session_id = %session.id, "Created assistant session");
        sessions.insert(user_id.to_string(), session.clone());
        session
    }

    /// Refresh the activity timestamp. Returns false if the user has no session.
    pub async fn touch(&self, user_id: &str) -> bool {
        match self.sessions.write().await.get_mut(user_id) {
            Some(session) => {
                session.last_active = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn clear(&self, user_id: &str) -> bool {
        self.sessions.write().await.remove(user_id).is_some()
    }

    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.sessions.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop every session idle longer than the timeout, except those of `busy` users
    pub async fn evict_idle(&self, busy: &HashSet<UserId>) -> Vec<UserId> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        self.sessions.write().await.retain(|user_id, session| {
            let expired = session.idle_for(now) > self.idle_timeout;
            if expired && !busy.contains(user_id) {
                evicted.push(user_id.clone());
                false
            } else {
                true
            }
        });

        evicted
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}
