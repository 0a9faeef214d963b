//! `OpenAI`-compatible agent transport using the `async-openai` crate.
//!
//! Drives one extraction session as a chat-completion tool loop: the
//! model requests file tools, the local executor answers them, and the
//! `submit_extraction_results` call lands in the session's capture.
//! Works with any API following the `OpenAI` chat completion spec via
//! the base URL override.

use std::path::Path;
use std::sync::Arc;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest, FunctionCall,
    FunctionObject,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::agent::capture::ResultCapture;
use crate::agent::event::{AgentEvent, EventStream, SessionRequest};
use crate::agent::executor::FileToolExecutor;
use crate::agent::tools::{SUBMIT_TOOL_NAME, ToolCall, ToolDefinition};
use crate::agent::transport::AgentTransport;
use crate::error::AgentError;
use crate::model::TokenUsage;

/// Maximum model ↔ tool round-trips per session.
const MAX_TOOL_ITERATIONS: usize = 25;
/// Event channel depth; backpressure kicks in beyond this.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// `OpenAI`-compatible transport with local file-tool execution.
pub struct OpenAiTransport {
    client: Client<OpenAIConfig>,
    executor: Arc<FileToolExecutor>,
}

impl OpenAiTransport {
    /// Creates a transport sandboxed to `data_root`.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>, data_root: &Path) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            executor: Arc::new(FileToolExecutor::new(data_root)),
        }
    }

    /// Creates a transport from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (or `KGF_API_KEY`) and optionally
    /// `OPENAI_BASE_URL` (or `KGF_BASE_URL`).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] when no key is set.
    pub fn from_env(data_root: &Path) -> Result<Self, AgentError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("KGF_API_KEY"))
            .map_err(|_| AgentError::ApiKeyMissing)?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .or_else(|_| std::env::var("KGF_BASE_URL"))
            .ok();
        Ok(Self::new(&api_key, base_url.as_deref(), data_root))
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ChatCompletionTool> {
        tools
            .iter()
            .map(|td| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: td.name.clone(),
                    description: Some(td.description.clone()),
                    parameters: Some(td.parameters.clone()),
                    strict: None,
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for OpenAiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTransport")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl AgentTransport for OpenAiTransport {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn open(&self, request: &SessionRequest) -> Result<EventStream, AgentError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let client = self.client.clone();
        let executor = Arc::clone(&self.executor);
        let session = SessionState {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: Self::convert_tools(&request.tools),
            capture: Arc::clone(&request.capture),
        };

        tokio::spawn(async move {
            run_session(&client, &executor, session, &tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

struct SessionState {
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    tools: Vec<ChatCompletionTool>,
    capture: Arc<ResultCapture>,
}

/// Runs the model ↔ tool round-trip loop, emitting events as it goes.
async fn run_session(
    client: &Client<OpenAIConfig>,
    executor: &FileToolExecutor,
    session: SessionState,
    tx: &mpsc::Sender<Result<AgentEvent, AgentError>>,
) {
    let mut messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(session.prompt.clone()),
                name: None,
            },
        )];

    let mut usage = TokenUsage::default();

    for iteration in 0..MAX_TOOL_ITERATIONS {
        let request = CreateChatCompletionRequest {
            model: session.model.clone(),
            messages: messages.clone(),
            temperature: Some(session.temperature).filter(|&t| t != 0.0),
            max_completion_tokens: Some(session.max_tokens),
            tools: if session.tools.is_empty() {
                None
            } else {
                Some(session.tools.clone())
            },
            ..Default::default()
        };

        let response = match client.chat().create(request).await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(Err(classify_openai_error(&e))).await;
                return;
            }
        };

        if let Some(u) = response.usage {
            usage.add(TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        let choice = response.choices.into_iter().next();
        let content = choice
            .as_ref()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let tool_calls = choice
            .and_then(|c| c.message.tool_calls)
            .unwrap_or_default();

        if tool_calls.is_empty() {
            let _ = tx
                .send(Ok(AgentEvent::Result {
                    text: content,
                    usage,
                }))
                .await;
            return;
        }

        debug!(iteration, tool_count = tool_calls.len(), "executing tool calls");
        messages.push(assistant_message(&content, &tool_calls));

        for call in &tool_calls {
            let input: serde_json::Value =
                serde_json::from_str(&call.function.arguments).unwrap_or_default();
            let _ = tx
                .send(Ok(AgentEvent::ToolUse {
                    name: call.function.name.clone(),
                    input: input.clone(),
                }))
                .await;

            let result_content = if call.function.name == SUBMIT_TOOL_NAME {
                // Route the structured submission into the capture and
                // relay its confirmation or rejection to the agent
                match session.capture.submit(&input) {
                    Ok(confirmation) => confirmation,
                    Err(e) => format!("ERROR: {e}"),
                }
            } else {
                let result = executor.execute(&ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });
                if result.is_error {
                    format!("ERROR: {}", result.content)
                } else {
                    result.content
                }
            };

            messages.push(ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessage {
                    content: ChatCompletionRequestToolMessageContent::Text(result_content),
                    tool_call_id: call.id.clone(),
                },
            ));
        }
    }

    let _ = tx
        .send(Err(AgentError::ToolLoopExceeded {
            max_iterations: MAX_TOOL_ITERATIONS,
        }))
        .await;
}

fn assistant_message(
    content: &str,
    tool_calls: &[ChatCompletionMessageToolCall],
) -> ChatCompletionRequestMessage {
    let converted: Vec<ChatCompletionMessageToolCall> = tool_calls
        .iter()
        .map(|tc| ChatCompletionMessageToolCall {
            id: tc.id.clone(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
            },
        })
        .collect();

    #[allow(deprecated)]
    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content: if content.is_empty() {
            None
        } else {
            Some(ChatCompletionRequestAssistantMessageContent::Text(
                content.to_string(),
            ))
        },
        name: None,
        tool_calls: Some(converted),
        refusal: None,
        audio: None,
        function_call: None,
    })
}

/// Maps an `async-openai` error onto the transport error contract.
fn classify_openai_error(error: &async_openai::error::OpenAIError) -> AgentError {
    let text = error.to_string();
    let lowered = text.to_lowercase();

    if lowered.contains("429") || lowered.contains("rate limit") {
        return AgentError::RateLimited {
            retry_after_seconds: None,
        };
    }
    if lowered.contains("413")
        || lowered.contains("prompt is too long")
        || lowered.contains("maximum context length")
    {
        return AgentError::PromptTooLong { message: text };
    }
    AgentError::Api { message: text }
}
