use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assistant::Assistant;
use crate::auth::IdentityExtractor;
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::session::{spawn_session_reaper, ConversationGate, SessionTable};
use crate::tasks::TaskStore;

/// Shared application state, built once in `main` and handed to every handler
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub sessions: Arc<SessionTable>,
    pub gate: Arc<ConversationGate>,
    /// None when no provider is configured; assistant requests are refused
    pub assistant: Option<Arc<dyn Assistant>>,
    pub tasks: Arc<dyn TaskStore>,
    pub identity: Arc<dyn IdentityExtractor>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityExtractor>,
        assistant: Option<Arc<dyn Assistant>>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), config.send_timeout);
        let sessions = Arc::new(SessionTable::new(config.session_idle_timeout));

        Self {
            config,
            registry,
            broadcaster,
            sessions,
            gate: Arc::new(ConversationGate::new()),
            assistant,
            tasks,
            identity,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the idle-session reaper; it runs until [`AppState::shutdown`]
    pub fn start_reaper(&self) -> JoinHandle<()> {
        spawn_session_reaper(
            self.sessions.clone(),
            self.gate.clone(),
            self.config.reap_interval,
            self.shutdown.clone(),
        )
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
