//! Pluggable agent transport trait.
//!
//! The pipeline treats the LLM agent runtime as an opaque capability:
//! submit a prompt, receive streamed events, one of which may carry a
//! structured tool-call submission. Implementations translate this
//! contract onto a concrete SDK; the pipeline itself never depends on
//! any particular vendor.

use async_trait::async_trait;

use super::event::{EventStream, SessionRequest};
use crate::error::AgentError;

/// Trait for agent session backends.
///
/// Implementations own the transport layer (HTTP, SDK calls, the
/// tool-execution loop) and must:
///
/// - honor the allowed-tool list in the request,
/// - route `submit_extraction_results` calls into the request's
///   [`ResultCapture`](super::capture::ResultCapture) and relay its
///   confirmation or rejection back to the agent,
/// - surface upstream throttling as [`AgentError::RateLimited`] and
///   oversized prompts as [`AgentError::PromptTooLong`].
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    /// Opens one agent session and returns its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the session cannot be started.
    /// Failures mid-session arrive as `Err` items on the stream.
    async fn open(&self, request: &SessionRequest) -> Result<EventStream, AgentError>;
}
