use super::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Ollama provider implementation, using the `/api/chat` endpoint with tools
pub struct OllamaAssistant {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaAssistant {
    /// Create a new Ollama provider with the given base URL and model
    pub fn new(base_url: String, model: String, timeout: Duration) -> AssistantResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::ConfigError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
            timeout,
        })
    }
}

impl Assistant for OllamaAssistant {
    fn start_conversation(&self, user_id: &str) -> Box<dyn Conversation> {
        tracing::debug!(user_id, model = %self.model, "Starting Ollama conversation");
        Box::new(OllamaConversation {
            client: self.client.clone(),
            url: format!("{}/api/chat", self.base_url),
            model: self.model.clone(),
            timeout: self.timeout,
            tools: tool_definitions().iter().map(OllamaTool::from).collect(),
            messages: vec![OllamaMessage::new("system", SYSTEM_PROMPT)],
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl OllamaMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaFunction {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

impl From<&ToolDefinition> for OllamaTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: OllamaFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    tools: &'a [OllamaTool],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

struct OllamaConversation {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
    tools: Vec<OllamaTool>,
    messages: Vec<OllamaMessage>,
}

impl OllamaConversation {
    fn push_turn(&mut self, turn: Turn) {
        match turn {
            Turn::User(text) => self.messages.push(OllamaMessage::new("user", text)),
            Turn::ActionResults(outcomes) => {
                for outcome in outcomes {
                    let mut message = OllamaMessage::new("tool", outcome.result.to_string());
                    message.tool_name = Some(outcome.name);
                    self.messages.push(message);
                }
            }
        }
    }
}

/// Ollama doesn't assign ids to tool calls, so every call gets a fresh one
fn to_reply(message: &OllamaMessage) -> Reply {
    if message.tool_calls.is_empty() {
        return Reply::Text(message.content.trim().to_string());
    }

    Reply::Actions(
        message
            .tool_calls
            .iter()
            .map(|call| ActionRequest {
                call_id: ulid::Ulid::new().to_string(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
            .collect(),
    )
}

#[async_trait]
impl Conversation for OllamaConversation {
    async fn send(&mut self, turn: Turn) -> AssistantResult<Reply> {
        let start = Instant::now();
        self.push_turn(turn);

        let request = OllamaChatRequest {
            model: &self.model,
            messages: &self.messages,
            tools: &self.tools,
            stream: false,
        };

        // Execute with timeout
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.url).json(&request).send(),
        )
        .await
        .map_err(|_| AssistantError::Timeout(self.timeout))?
        .map_err(|e| AssistantError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AssistantError::ApiError(format!(
                "Ollama API returned status: {}",
                response.status()
            )));
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::ParseError(e.to_string()))?;

        let reply = to_reply(&chat.message);
        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            tool_calls = chat.message.tool_calls.len(),
            "Ollama reply received"
        );
        self.messages.push(chat.message);
        Ok(reply)
    }

    fn record_results(&mut self, outcomes: Vec<ActionOutcome>) -> AssistantResult<()> {
        self.push_turn(Turn::ActionResults(outcomes));
        Ok(())
    }
}
