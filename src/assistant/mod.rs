mod ollama;
mod openai;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{NewTask, Priority};

pub use ollama::OllamaAssistant;
pub use openai::OpenAiAssistant;

/// Result type for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Errors that can occur while talking to the assistant
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// One input pushed into a conversation
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    /// Results for every action the previous reply asked for
    ActionResults(Vec<ActionOutcome>),
}

/// What the model answered
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Actions(Vec<ActionRequest>),
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub call_id: String,
    pub name: String,
    pub result: Value,
}

/// Actions the assistant is allowed to take
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateTask(NewTask),
    ListTasks,
}

impl Action {
    pub const CREATE_TASK: &'static str = "create_task";
    pub const LIST_TASKS: &'static str = "get_user_tasks";

    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateTask(_) => Self::CREATE_TASK,
            Action::ListTasks => Self::LIST_TASKS,
        }
    }

    /// Validate a tool call from the model
    pub fn parse(request: &ActionRequest) -> Result<Self, String> {
        match request.name.as_str() {
            Self::CREATE_TASK => {
                let field = |key: &str| {
                    request
                        .arguments
                        .get(key)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .ok_or_else(|| format!("missing or invalid field '{}'", key))
                };
                Ok(Action::CreateTask(NewTask {
                    title: field("title")?,
                    description: field("description")?,
                    priority: Priority::from_label(&field("priority")?),
                }))
            }
            Self::LIST_TASKS => Ok(Action::ListTasks),
            other => Err(format!("unknown function call: {}", other)),
        }
    }
}

/// A tool the model may call, in provider-neutral form
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Tools offered to every conversation
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: Action::CREATE_TASK,
            description: "Create a new task with the given details. All fields (title, description, priority) are required.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "The title of the task"},
                    "description": {"type": "string", "description": "A detailed description of the task"},
                    "priority": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "Priority level: low, medium, or high"
                    }
                },
                "required": ["title", "description", "priority"]
            }),
        },
        ToolDefinition {
            name: Action::LIST_TASKS,
            description: "Get all tasks created by or assigned to the current user.",
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

pub const SYSTEM_PROMPT: &str = r#"You are a task management assistant. You help users create tasks and decide which of their existing tasks to work on.

Creating tasks:
- Call create_task only once title, description and priority are known.
- Take fields the user states directly. Infer a field only when you are nearly certain of it.
- Ask only for fields you cannot infer. Each user message answers your previous question, so do not repeat questions.
- If the user is in a hurry, write the description yourself from their first message.
- If no priority is given, use "medium". Once every field is known, call the function without further questions.

Prioritizing:
- When the user asks what to focus on, call get_user_tasks.
- Rank the returned tasks by priority (high before medium before low), then by age, and focus on pending work.
- Recommend the task(s) to start with and give a short reason."#;

/// An ongoing conversation with the model.
/// Owned by the session table; only one turn drives it at a time.
#[async_trait]
pub trait Conversation: Send {
    async fn send(&mut self, turn: Turn) -> AssistantResult<Reply>;

    /// Append action results to the history without asking the model for a reply.
    /// Every action request in the history must be answered before the next user turn.
    fn record_results(&mut self, outcomes: Vec<ActionOutcome>) -> AssistantResult<()>;
}

/// Trait that all assistant providers must implement
pub trait Assistant: Send + Sync {
    /// Start a fresh, isolated conversation. Must not perform I/O.
    fn start_conversation(&self, user_id: &str) -> Box<dyn Conversation>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Configuration for the assistant providers
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Timeout for a single model request
    pub timeout: Duration,
    /// Max tokens per model response
    pub max_tokens: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: None,
            ollama_model: "llama3.2".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 1024,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl AssistantConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_model: non_empty_env("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url: non_empty_env("OLLAMA_BASE_URL"),
            ollama_model: non_empty_env("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            timeout: non_empty_env("ASSISTANT_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_tokens: non_empty_env("ASSISTANT_MAX_TOKENS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
        }
    }

    /// Build the configured provider, preferring OpenAI over Ollama
    pub fn build_assistant(&self) -> AssistantResult<Arc<dyn Assistant>> {
        if let Some(api_key) = &self.openai_api_key {
            return Ok(Arc::new(OpenAiAssistant::new(
                api_key.clone(),
                self.openai_model.clone(),
                self.timeout,
                self.max_tokens,
            )?));
        }

        if let Some(base_url) = &self.ollama_base_url {
            return Ok(Arc::new(OllamaAssistant::new(
                base_url.clone(),
                self.ollama_model.clone(),
                self.timeout,
            )?));
        }

        Err(AssistantError::ConfigError(
            "No assistant provider configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn request(name: &str, arguments: Value) -> ActionRequest {
        ActionRequest {
            call_id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_parse_create_task() {
        let action = Action::parse(&request(
            "create_task",
            json!({"title": " Buy milk ", "description": "2 liters", "priority": "HIGH"}),
        ))
        .unwrap();

        assert_eq!(
            action,
            Action::CreateTask(NewTask {
                title: "Buy milk".to_string(),
                description: "2 liters".to_string(),
                priority: Priority::High,
            })
        );
        assert_eq!(action.name(), "create_task");
    }

    #[test]
    fn test_parse_create_task_missing_field() {
        let err = Action::parse(&request(
            "create_task",
            json!({"title": "Buy milk", "priority": "low"}),
        ))
        .unwrap_err();
        assert!(err.contains("description"));

        let err = Action::parse(&request(
            "create_task",
            json!({"title": 42, "description": "x", "priority": "low"}),
        ))
        .unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn test_parse_list_and_unknown() {
        assert_eq!(
            Action::parse(&request("get_user_tasks", Value::Null)).unwrap(),
            Action::ListTasks
        );
        assert!(Action::parse(&request("delete_everything", json!({})))
            .unwrap_err()
            .contains("unknown function"));
    }

    #[test]
    fn test_tool_definitions_cover_actions() {
        let names: Vec<_> = tool_definitions().iter().map(|t| t.name).collect();
        assert_eq!(names, vec![Action::CREATE_TASK, Action::LIST_TASKS]);
    }

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.ollama_model, "llama3.2");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.build_assistant().is_err());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("OPENAI_API_KEY", "  ");
        std::env::set_var("OLLAMA_BASE_URL", "http://ollama:11434");
        std::env::set_var("OLLAMA_MODEL", "qwen2.5");
        std::env::set_var("ASSISTANT_TIMEOUT", "5");

        let config = AssistantConfig::from_env();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.ollama_base_url.as_deref(), Some("http://ollama:11434"));
        assert_eq!(config.ollama_model, "qwen2.5");
        assert_eq!(config.timeout, Duration::from_secs(5));

        let assistant = config.build_assistant().unwrap();
        assert_eq!(assistant.name(), "ollama");

        for key in [
            "OPENAI_API_KEY",
            "OLLAMA_BASE_URL",
            "OLLAMA_MODEL",
            "ASSISTANT_TIMEOUT",
        ] {
            std::env::remove_var(key);
        }
    }
}
