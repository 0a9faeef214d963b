//! Agent session layer for extraction.
//!
//! Drives one LLM agent session per chunk: the agent reads source
//! files through sandboxed tools and returns entities through a
//! schema-validated tool call. The transport is pluggable; the
//! pipeline only depends on the [`AgentTransport`] seam.
//!
//! # Architecture
//!
//! ```text
//! Chunk → ExtractionWorker
//!   ├── RateLimitCoordinator.acquire()
//!   ├── AgentTransport.open(prompt + tools)
//!   │     ├── read_file / list_files / grep_files → FileToolExecutor
//!   │     └── submit_extraction_results → ResultCapture (one-shot)
//!   ├── take submission (or parse text, or corrective retry)
//!   └── parse + validate records → ExtractionResult
//! ```

pub mod capture;
pub mod event;
pub mod executor;
pub mod parse;
pub mod providers;
pub mod tools;
pub mod transport;
pub mod worker;

// Re-export key types
pub use capture::{ResultCapture, Submission};
pub use event::{AgentEvent, EventStream, SessionRequest};
pub use executor::FileToolExecutor;
pub use providers::OpenAiTransport;
pub use tools::{SUBMIT_TOOL_NAME, ToolCall, ToolDefinition, ToolResult, ToolSet};
pub use transport::AgentTransport;
pub use worker::ExtractionWorker;
