//! # KG-Forge
//!
//! Knowledge graph extraction pipeline.
//!
//! KG-Forge ingests a directory tree of structured configuration files
//! (YAML/JSON describing infrastructure, services, teams) and produces
//! a deduplicated, validated knowledge graph in JSON-LD form. An LLM
//! agent reads files through sandboxed tools and returns entities via
//! a schema-validated tool call.
//!
//! ## Pipeline
//!
//! ```text
//! Discovery → Planning (Chunker) → Checkpoint-Filter → Worker Pool
//!     Rate-Limit Coordinator ← agent sessions ← Workers
//!     Per-chunk results → Deduplicator → Graph Validator → Emitter
//! ```
//!
//! ## Features
//!
//! - **Bounded parallelism**: a worker pool drives concurrent agent
//!   sessions, with a single process-wide rate-limit gate
//! - **Checkpointed resume**: per-chunk progress persists atomically,
//!   keyed by a configuration hash
//! - **Structured capture**: the agent submits results through a typed
//!   tool call, schema-enforced on arrival
//! - **Split-on-oversize**: chunks that overflow the context window
//!   split and retry automatically

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod agent;
pub mod checkpoint;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod prompt;
pub mod ratelimit;
pub mod validate;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use model::{Entity, ExtractionMetrics, ExtractionResult, PropertyValue, Severity, TokenUsage, ValidationIssue};

// Re-export pipeline types
pub use chunking::{Chunk, ChunkPlanner, HybridChunker};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use orchestrator::{OrchestrationResult, Orchestrator};
pub use output::JsonLdGraph;

// Re-export checkpoint types
pub use checkpoint::{Checkpoint, CheckpointStore, DiskCheckpointStore, MemoryCheckpointStore};

// Re-export agent types
pub use agent::{AgentTransport, ExtractionWorker, OpenAiTransport, ResultCapture};

// Re-export coordination types
pub use ratelimit::RateLimitCoordinator;

// Re-export dedup and validation types
pub use dedup::{DedupMetrics, DedupResult, UrnDeduplicator};
pub use validate::EntityValidator;
