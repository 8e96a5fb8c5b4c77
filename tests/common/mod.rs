#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ws::Message;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use taskpulse::assistant::{
    ActionOutcome, ActionRequest, Assistant, AssistantResult, Conversation, Reply, Turn,
};
use taskpulse::auth::JwtAuth;
use taskpulse::config::ServerConfig;
use taskpulse::registry::Connection;
use taskpulse::state::AppState;
use taskpulse::tasks::InMemoryTaskStore;

pub const SECRET: &[u8] = b"integration-secret";

/// Assistant whose replies come from a shared queue.
///
/// Every conversation records the turns it receives. With `hold` set, each
/// `send` waits for one `release()` before answering.
#[derive(Default)]
pub struct ScriptedAssistant {
    replies: Arc<Mutex<VecDeque<AssistantResult<Reply>>>>,
    turns: Arc<Mutex<Vec<Turn>>>,
    hold: Option<Arc<Semaphore>>,
    started: AtomicUsize,
}

impl ScriptedAssistant {
    pub fn new(replies: Vec<AssistantResult<Reply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Default::default()
        })
    }

    /// Like `new`, but every reply waits for `release()`
    pub fn held(replies: Vec<AssistantResult<Reply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Arc::new(Mutex::new(replies.into())),
            hold: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        })
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

struct ScriptedConversation {
    replies: Arc<Mutex<VecDeque<AssistantResult<Reply>>>>,
    turns: Arc<Mutex<Vec<Turn>>>,
    hold: Option<Arc<Semaphore>>,
}

#[async_trait]
impl Conversation for ScriptedConversation {
    async fn send(&mut self, turn: Turn) -> AssistantResult<Reply> {
        self.turns.lock().push(turn);
        if let Some(hold) = &self.hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| Ok(Reply::Text("done".to_string())))
    }

    fn record_results(&mut self, outcomes: Vec<ActionOutcome>) -> AssistantResult<()> {
        self.turns.lock().push(Turn::ActionResults(outcomes));
        Ok(())
    }
}

impl Assistant for ScriptedAssistant {
    fn start_conversation(&self, _user_id: &str) -> Box<dyn Conversation> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedConversation {
            replies: self.replies.clone(),
            turns: self.turns.clone(),
            hold: self.hold.clone(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        send_timeout: Duration::from_secs(1),
        outbound_buffer: 16,
        ..ServerConfig::default()
    }
}

pub fn test_state(assistant: Option<Arc<dyn Assistant>>) -> Arc<AppState> {
    Arc::new(AppState::new(
        test_config(),
        Arc::new(JwtAuth::new(SECRET)),
        assistant,
        Arc::new(InMemoryTaskStore::new()),
    ))
}

pub fn token_for(user_id: &str) -> String {
    JwtAuth::new(SECRET).issue_token(user_id, None).unwrap()
}

/// Register a channel-backed connection for `user_id`
pub async fn connect(
    state: &AppState,
    user_id: &str,
) -> (Arc<Connection>, mpsc::Receiver<Message>) {
    let (conn, rx) = Connection::channel(user_id.to_string(), 16);
    state.registry.register(conn.clone()).await;
    (conn, rx)
}

/// Next envelope queued for a connection, as JSON
pub async fn next_envelope(rx: &mut mpsc::Receiver<Message>) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("connection queue closed");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected text frame, got {:?}", other),
    }
}

/// Assert nothing arrives within a short window
pub async fn assert_quiet(rx: &mut mpsc::Receiver<Message>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "Unexpected envelope: {:?}", result);
}

pub fn ai_request(message: &str) -> String {
    json!({"type": "ai_request", "payload": {"message": message}}).to_string()
}

pub fn action(call_id: &str, name: &str, arguments: Value) -> ActionRequest {
    ActionRequest {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub fn create_task_call(title: &str) -> Reply {
    Reply::Actions(vec![action(
        "call_create",
        "create_task",
        json!({"title": title, "description": "from the assistant", "priority": "high"}),
    )])
}
