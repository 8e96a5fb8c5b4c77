use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionObjectArgs,
    },
    Client,
};
use std::time::Instant;

fn api_error(e: impl std::fmt::Display) -> AssistantError {
    AssistantError::ApiError(e.to_string())
}

/// OpenAI provider implementation
pub struct OpenAiAssistant {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
    tools: Vec<ChatCompletionTool>,
    system: ChatCompletionRequestMessage,
}

impl OpenAiAssistant {
    /// Create a new OpenAI provider with the given API key and model
    pub fn new(
        api_key: String,
        model: String,
        timeout: Duration,
        max_tokens: u32,
    ) -> AssistantResult<Self> {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        let tools = tool_definitions()
            .into_iter()
            .map(|tool| {
                let function = FunctionObjectArgs::default()
                    .name(tool.name)
                    .description(tool.description)
                    .parameters(tool.parameters)
                    .build()?;
                ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(function)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AssistantError::ConfigError(e.to_string()))?;

        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| AssistantError::ConfigError(e.to_string()))?
            .into();

        Ok(Self {
            client,
            model,
            timeout,
            max_tokens,
            tools,
            system,
        })
    }
}

impl Assistant for OpenAiAssistant {
    fn start_conversation(&self, user_id: &str) -> Box<dyn Conversation> {
        tracing::debug!(user_id, model = %self.model, "Starting OpenAI conversation");
        Box::new(OpenAiConversation {
            client: self.client.clone(),
            model: self.model.clone(),
            timeout: self.timeout,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
            messages: vec![self.system.clone()],
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

struct OpenAiConversation {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
    tools: Vec<ChatCompletionTool>,
    messages: Vec<ChatCompletionRequestMessage>,
}

impl OpenAiConversation {
    fn push_turn(&mut self, turn: Turn) -> AssistantResult<()> {
        match turn {
            Turn::User(text) => {
                let message = ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()
                    .map_err(api_error)?;
                self.messages.push(message.into());
            }
            Turn::ActionResults(outcomes) => {
                for outcome in outcomes {
                    let message = ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(outcome.call_id)
                        .content(outcome.result.to_string())
                        .build()
                        .map_err(api_error)?;
                    self.messages.push(message.into());
                }
            }
        }
        Ok(())
    }

    /// Record the model's tool calls so the follow-up tool messages line up with them
    fn push_tool_calls(
        &mut self,
        content: Option<String>,
        tool_calls: &[ChatCompletionMessageToolCall],
    ) -> AssistantResult<()> {
        let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
        builder.tool_calls(tool_calls.to_vec());
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            builder.content(content);
        }
        self.messages
            .push(builder.build().map_err(api_error)?.into());
        Ok(())
    }
}

#[async_trait]
impl Conversation for OpenAiConversation {
    async fn send(&mut self, turn: Turn) -> AssistantResult<Reply> {
        let start = Instant::now();
        self.push_turn(turn)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.messages.clone())
            .tools(self.tools.clone())
            .max_completion_tokens(self.max_tokens)
            .build()
            .map_err(api_error)?;

        // Execute with timeout
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AssistantError::Timeout(self.timeout))?
            .map_err(api_error)?;

        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens);
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AssistantError::ParseError("No choices in response".to_string()))?;

        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            tokens_used,
            "OpenAI reply received"
        );

        if let Some(tool_calls) = message.tool_calls.filter(|calls| !calls.is_empty()) {
            self.push_tool_calls(message.content, &tool_calls)?;
            let requests = tool_calls
                .into_iter()
                .map(|call| ActionRequest {
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::String(call.function.arguments)),
                    call_id: call.id,
                    name: call.function.name,
                })
                .collect();
            return Ok(Reply::Actions(requests));
        }

        let text = message
            .content
            .ok_or_else(|| AssistantError::ParseError("No content in response".to_string()))?;
        let assistant = ChatCompletionRequestAssistantMessageArgs::default()
            .content(text.clone())
            .build()
            .map_err(api_error)?;
        self.messages.push(assistant.into());

        Ok(Reply::Text(text.trim().to_string()))
    }

    fn record_results(&mut self, outcomes: Vec<ActionOutcome>) -> AssistantResult<()> {
        self.push_turn(Turn::ActionResults(outcomes))
    }
}
