//! Assistant turns triggered by `ai_request` envelopes

use serde_json::{json, Value};
use std::sync::Arc;

use crate::assistant::{
    Action, ActionOutcome, ActionRequest, Assistant, AssistantError, Conversation, Reply, Turn,
};
use crate::protocol::{ErrorCode, ServerMessage};
use crate::registry::Connection;
use crate::session::GateGuard;
use crate::state::AppState;
use crate::types::{Task, TaskId};

/// Rounds of tool calls allowed before a turn is abandoned
pub const MAX_ACTION_ROUNDS: usize = 4;

pub const BUSY_MESSAGE: &str =
    "You already have an active conversation. Please wait for a response.";

pub const UNAVAILABLE_MESSAGE: &str = "AI assistant is not configured";

/// Result handed to the model for tool calls past the round limit
pub const ACTION_LIMIT_MESSAGE: &str = "action limit reached";

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error("assistant requested more than {0} rounds of actions")]
    TooManyActions(usize),
}

/// Admit the request through the conversation gate and run the turn in the background.
///
/// Returns an immediate error envelope when the assistant is unavailable or the
/// user already has a turn in flight; otherwise the reply arrives later on `conn`.
pub async fn handle_ai_request(
    state: &Arc<AppState>,
    conn: &Arc<Connection>,
    message: String,
) -> Option<ServerMessage> {
    let Some(assistant) = state.assistant.clone() else {
        return Some(ServerMessage::error(
            ErrorCode::AssistantUnavailable,
            UNAVAILABLE_MESSAGE,
        ));
    };

    let Some(guard) = state.gate.try_enter(conn.user_id()) else {
        tracing::info!(
            user_id = conn.user_id(),
            conn_id = conn.id(),
            "Rejected assistant request, turn already in flight"
        );
        return Some(ServerMessage::error(ErrorCode::Busy, BUSY_MESSAGE));
    };

    tokio::spawn(run_request(
        state.clone(),
        conn.clone(),
        assistant,
        guard,
        message,
    ));
    None
}

async fn run_request(
    state: Arc<AppState>,
    conn: Arc<Connection>,
    assistant: Arc<dyn Assistant>,
    guard: GateGuard,
    message: String,
) {
    let result = run_turn(&state, guard.user_id(), assistant.as_ref(), message).await;
    drop(guard);

    let reply = match result {
        Ok(text) => ServerMessage::AiResponse { message: text },
        Err(e) => {
            tracing::error!(user_id = conn.user_id(), error = %e, "Assistant turn failed");
            ServerMessage::error(ErrorCode::AssistantFailed, format!("AI processing error: {}", e))
        }
    };

    if let Err(e) = conn.send_message(&reply, state.config.send_timeout).await {
        tracing::warn!(
            conn_id = conn.id(),
            user_id = conn.user_id(),
            error = %e,
            "Failed to deliver assistant reply"
        );
    }
}

/// Drive one user message through the conversation until the model answers in text
async fn run_turn(
    state: &AppState,
    user_id: &str,
    assistant: &dyn Assistant,
    message: String,
) -> Result<String, TurnError> {
    let session = state.sessions.get_or_create(user_id, assistant).await;
    let handle = session.conversation();
    let mut conversation = handle.lock().await;

    tracing::debug!(user_id, session_id = %session.id, "Forwarding message to assistant");

    let mut created_tasks = Vec::new();
    let result = converse(state, user_id, &mut **conversation, message, &mut created_tasks).await;
    drop(conversation);

    let text = match result {
        Ok(text) => text,
        Err(e) => {
            // Tasks stay created and broadcast; the session is kept like any other failure
            if !created_tasks.is_empty() {
                tracing::warn!(
                    user_id,
                    session_id = %session.id,
                    task_ids = ?created_tasks,
                    "Assistant turn failed after creating tasks"
                );
            }
            return Err(e);
        }
    };

    // A finished task flow starts the next request from a clean conversation
    if created_tasks.is_empty() {
        state.sessions.touch(user_id).await;
    } else {
        state.sessions.clear(user_id).await;
        tracing::debug!(user_id, session_id = %session.id, "Cleared session after task creation");
    }

    Ok(text)
}

/// Exchange turns with the model, performing requested actions, until it replies in text
async fn converse(
    state: &AppState,
    user_id: &str,
    conversation: &mut dyn Conversation,
    message: String,
    created_tasks: &mut Vec<TaskId>,
) -> Result<String, TurnError> {
    let mut reply = conversation.send(Turn::User(message)).await?;
    let mut rounds = 0;

    loop {
        let requests = match reply {
            Reply::Text(text) => return Ok(text),
            Reply::Actions(requests) => requests,
        };

        rounds += 1;
        if rounds > MAX_ACTION_ROUNDS {
            // Answer the cut-off calls so the kept history stays valid for the next request
            let refused = requests
                .into_iter()
                .map(|request| ActionOutcome {
                    call_id: request.call_id,
                    name: request.name,
                    result: json!({"success": false, "error": ACTION_LIMIT_MESSAGE}),
                })
                .collect();
            conversation.record_results(refused)?;
            return Err(TurnError::TooManyActions(MAX_ACTION_ROUNDS));
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let (result, created) = perform_action(state, user_id, &request).await;
            created_tasks.extend(created);
            outcomes.push(ActionOutcome {
                call_id: request.call_id,
                name: request.name,
                result,
            });
        }
        reply = conversation.send(Turn::ActionResults(outcomes)).await?;
    }
}

/// Execute one tool call. Returns the result for the model and the id of a created task.
async fn perform_action(
    state: &AppState,
    user_id: &str,
    request: &ActionRequest,
) -> (Value, Option<TaskId>) {
    let action = match Action::parse(request) {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(user_id, action = %request.name, error = %e, "Invalid action from assistant");
            return (json!({"success": false, "error": e}), None);
        }
    };
    tracing::debug!(user_id, action = action.name(), call_id = %request.call_id, "Performing action");

    match action {
        Action::CreateTask(new_task) => match state.tasks.create_task(user_id, new_task).await {
            Ok(task) => {
                tracing::info!(user_id, task_id = %task.id, "Task created by assistant");
                let task_id = task.id.clone();
                let result = json!({
                    "success": true,
                    "taskId": task.id,
                    "message": "Task created successfully",
                });
                state
                    .broadcaster
                    .broadcast(&ServerMessage::TaskCreated(task))
                    .await;
                (result, Some(task_id))
            }
            Err(e) => {
                tracing::warn!(user_id, action = Action::CREATE_TASK, error = %e, "Action failed");
                (json!({"success": false, "error": e.to_string()}), None)
            }
        },

        Action::ListTasks => match state.tasks.tasks_for_user(user_id).await {
            Ok(tasks) => (json!({"success": true, "summary": summarize_tasks(&tasks)}), None),
            Err(e) => {
                tracing::warn!(user_id, action = Action::LIST_TASKS, error = %e, "Action failed");
                (json!({"success": false, "error": e.to_string()}), None)
            }
        },
    }
}

/// Plain-text task list handed to the model
fn summarize_tasks(tasks: &[Task]) -> String {
    let mut summary = String::from("Tasks:\n");
    for task in tasks {
        summary.push_str(&format!(
            "- ID: {}\n  Title: {}\n  Description: {}\n  Priority: {}\n  Status: {}\n  Created: {}\n\n",
            task.id,
            task.title,
            task.description,
            task.priority.as_str(),
            task.status.as_str(),
            task.created_at.to_rfc3339(),
        ));
    }
    summary
}
