//! Error types for kg-forge operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! pipeline operations: configuration, agent transport, per-chunk
//! extraction, and checkpoint storage.

use thiserror::Error;

/// Result type alias for kg-forge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (bad data root, invalid option combination).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Agent transport or tool errors.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Per-chunk extraction failures that escaped the orchestrator.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionFailure),

    /// Checkpoint or output persistence errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Run cancelled by the caller.
    #[error("extraction cancelled")]
    Cancelled,

    /// Validation errors present and `fail_on_validation_errors` is set.
    #[error("graph validation failed with {error_count} error(s)")]
    ValidationFailed {
        /// Number of error-severity issues.
        error_count: usize,
    },

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Data root does not exist.
    #[error("data directory not found: {path}")]
    DataDirNotFound {
        /// Path that was not found.
        path: String,
    },

    /// Data root exists but is not a directory.
    #[error("data directory is not a directory: {path}")]
    NotADirectory {
        /// Offending path.
        path: String,
    },

    /// A field failed range or format validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Configuration field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Config hash serialization failed.
    #[error("failed to hash configuration: {0}")]
    Hash(String),
}

/// Errors surfaced by the agent transport and its tools.
#[derive(Error, Debug)]
pub enum AgentError {
    /// No API key found in configuration or environment.
    #[error("no API key configured (set OPENAI_API_KEY or KGF_API_KEY)")]
    ApiKeyMissing,

    /// Upstream API failure that is not a recognized special case.
    #[error("API error: {message}")]
    Api {
        /// Provider error message.
        message: String,
    },

    /// Upstream throttling (HTTP 429 or equivalent).
    #[error("rate limited by upstream (retry after {retry_after_seconds:?}s)")]
    RateLimited {
        /// Advised cooldown, if the upstream supplied one.
        retry_after_seconds: Option<u64>,
    },

    /// Prompt rejected as oversized (HTTP 413 or embedded marker).
    #[error("prompt too long: {message}")]
    PromptTooLong {
        /// Provider error message.
        message: String,
    },

    /// Event stream failure.
    #[error("stream error: {message}")]
    Stream {
        /// Description of the failure.
        message: String,
    },

    /// The terminal response could not be parsed.
    #[error("response parse error: {message}")]
    ResponseParse {
        /// Diagnostic message with preview.
        message: String,
        /// Raw response content for debugging.
        content: String,
    },

    /// A tool call failed during execution.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A submission was rejected by the capture schema check.
    #[error("submission rejected: {message}")]
    SubmissionRejected {
        /// Why the submission was rejected.
        message: String,
    },

    /// No tool submission arrived before the deadline.
    #[error("no extraction result submitted within {timeout_seconds}s")]
    NoSubmission {
        /// The timeout that elapsed.
        timeout_seconds: u64,
    },

    /// Session exceeded its wall-clock budget.
    #[error("agent session timed out after {seconds}s")]
    Timeout {
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// Tool-calling loop exceeded its iteration budget.
    #[error("tool loop exceeded {max_iterations} iterations")]
    ToolLoopExceeded {
        /// The configured iteration cap.
        max_iterations: usize,
    },
}

/// Worker-level failure classification for a single chunk.
///
/// The orchestrator routes on these variants: `RateLimited` re-enqueues
/// the same chunk, `PromptTooLong` triggers a split, `Transient` has
/// already been retried in-worker, and the rest mark the chunk failed
/// or skipped.
#[derive(Error, Debug)]
pub enum ExtractionFailure {
    /// The rendered prompt exceeded the model's context window.
    #[error("chunk {chunk_id}: prompt too long")]
    PromptTooLong {
        /// Chunk that overflowed.
        chunk_id: String,
    },

    /// Upstream throttling; the coordinator has been tripped.
    #[error("chunk {chunk_id}: rate limited (retry after {retry_after_seconds}s)")]
    RateLimited {
        /// Chunk that observed the signal.
        chunk_id: String,
        /// Cooldown applied to the coordinator.
        retry_after_seconds: u64,
    },

    /// Retries exhausted on a transient fault.
    #[error("chunk {chunk_id}: transient failure after {attempts} attempt(s): {cause}")]
    Transient {
        /// Chunk that failed.
        chunk_id: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Last observed cause.
        cause: String,
    },

    /// Neither a tool submission nor recognizable JSON, after the
    /// corrective retry.
    #[error("chunk {chunk_id}: unparseable agent response: {message}")]
    Parse {
        /// Chunk that failed.
        chunk_id: String,
        /// Diagnostic message.
        message: String,
    },

    /// Prompt template rendering failed (non-retryable).
    #[error("prompt template error: {message}")]
    Prompt {
        /// Rendering failure description.
        message: String,
    },

    /// A single-file chunk cannot be split further.
    #[error("cannot split chunk {chunk_id}: it has only {file_count} file(s)")]
    CannotSplit {
        /// Chunk that was asked to split.
        chunk_id: String,
        /// Number of files in the chunk.
        file_count: usize,
    },

    /// The run was cancelled while this chunk was in flight.
    #[error("chunk processing cancelled")]
    Cancelled,
}

/// Checkpoint and output persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error at {path}: {reason}")]
    Io {
        /// Path involved in the operation.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checkpoint format version does not match this build.
    #[error("checkpoint version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version found in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store(StoreError::Io {
            path: String::new(),
            reason: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
