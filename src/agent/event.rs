//! Event vocabulary for agent sessions.
//!
//! A session is one bounded interaction with the LLM: a single prompt
//! in, an ordered stream of events out, ending with a terminal result.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;

use super::capture::ResultCapture;
use super::tools::ToolDefinition;
use crate::error::AgentError;
use crate::model::TokenUsage;

/// One event from an agent session stream.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent invoked a tool. Surfaced as a progress signal.
    ToolUse {
        /// Tool name.
        name: String,
        /// Tool input payload.
        input: serde_json::Value,
    },
    /// A fragment of assistant text as it streams.
    ContentDelta {
        /// Text fragment.
        text: String,
    },
    /// Terminal message carrying the assistant's final text response.
    Result {
        /// Final assistant text.
        text: String,
        /// Cumulative token usage for the session.
        usage: TokenUsage,
    },
}

/// Ordered stream of session events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// A request to open one agent session.
#[derive(Clone)]
pub struct SessionRequest {
    /// The single user prompt for this session.
    pub prompt: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens for the response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Tools the agent may use (file access plus the submission tool).
    pub tools: Vec<ToolDefinition>,
    /// One-shot slot the transport fills when the agent calls
    /// `submit_extraction_results`.
    pub capture: Arc<ResultCapture>,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("prompt_len", &self.prompt.len())
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}
