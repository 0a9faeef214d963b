//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// KG-Forge: knowledge graph extraction pipeline.
///
/// Extracts a deduplicated, validated JSON-LD knowledge graph from a
/// directory tree of structured configuration files.
#[derive(Parser, Debug)]
#[command(name = "kg-forge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract a knowledge graph from a data directory.
    ///
    /// Requires an `OpenAI`-compatible endpoint via `OPENAI_API_KEY`
    /// (and optionally `OPENAI_BASE_URL`).
    #[command(after_help = r#"Examples:
  kg-forge extract --data-dir ./services              # Full extraction
  kg-forge extract --data-dir ./services --workers 8  # Parallel workers
  kg-forge extract --data-dir ./services --resume     # Resume a killed run
  kg-forge extract --data-dir ./services --pattern '**/*.yml'
"#)]
    Extract {
        /// Directory containing data files to extract from.
        #[arg(long, env = "KGF_DATA_DIR")]
        data_dir: PathBuf,

        /// Output JSON-LD file path.
        #[arg(long, default_value = "knowledge_graph.jsonld")]
        output_file: PathBuf,

        /// Resume from the latest checkpoint.
        #[arg(long)]
        resume: bool,

        /// Worker pool size.
        #[arg(long, default_value = "1", env = "KGF_WORKERS")]
        workers: usize,

        /// Glob filter for file discovery (e.g. '**/*.yml').
        #[arg(long)]
        pattern: Option<String>,

        /// Directory of schema files referenced by the prompt.
        #[arg(long, env = "KGF_SCHEMA_DIR")]
        schema_dir: Option<PathBuf>,

        /// Directory of prompt template overrides.
        #[arg(long, env = "KGF_PROMPT_DIR")]
        prompt_dir: Option<PathBuf>,

        /// Chunking strategy: hybrid, directory, size, count.
        #[arg(long, default_value = "hybrid")]
        chunking_strategy: String,

        /// Target chunk size in MB.
        #[arg(long, default_value = "10")]
        chunk_size_mb: u64,

        /// Maximum files per chunk.
        #[arg(long, default_value = "100")]
        max_files_per_chunk: usize,

        /// URN merge strategy: first, last, merge_properties.
        #[arg(long, default_value = "merge_properties")]
        urn_merge_strategy: String,

        /// Disable checkpointing.
        #[arg(long)]
        no_checkpoint: bool,

        /// Checkpoint directory.
        #[arg(long, default_value = ".checkpoints")]
        checkpoint_dir: PathBuf,

        /// Checkpoint strategy: per_chunk, every_n, time_based.
        #[arg(long, default_value = "per_chunk")]
        checkpoint_strategy: String,

        /// Model identifier.
        #[arg(long, env = "KGF_MODEL")]
        model: Option<String>,

        /// Maximum retry attempts for transient failures.
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Per-chunk agent session timeout in seconds.
        #[arg(long, default_value = "300")]
        timeout_seconds: u64,

        /// Fail the run when error-severity validation issues remain.
        #[arg(long)]
        fail_on_validation_errors: bool,

        /// Downgrade a missing entity name to a warning.
        #[arg(long)]
        allow_missing_name: bool,

        /// Disable orphan detection.
        #[arg(long)]
        no_detect_orphans: bool,

        /// Disable broken-reference detection.
        #[arg(long)]
        no_detect_broken_refs: bool,
    },

    /// Preview the chunk plan without calling any LLM.
    #[command(after_help = r#"Examples:
  kg-forge plan --data-dir ./services
  kg-forge plan --data-dir ./services --chunk-size-mb 5 --max-files-per-chunk 20
"#)]
    Plan {
        /// Directory containing data files.
        #[arg(long, env = "KGF_DATA_DIR")]
        data_dir: PathBuf,

        /// Glob filter for file discovery.
        #[arg(long)]
        pattern: Option<String>,

        /// Chunking strategy: hybrid, directory, size, count.
        #[arg(long, default_value = "hybrid")]
        chunking_strategy: String,

        /// Target chunk size in MB.
        #[arg(long, default_value = "10")]
        chunk_size_mb: u64,

        /// Maximum files per chunk.
        #[arg(long, default_value = "100")]
        max_files_per_chunk: usize,
    },

    /// Checkpoint operations (list, show, delete).
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),

    /// Re-run graph validation on an emitted JSON-LD document.
    Validate {
        /// Path to the JSON-LD graph document.
        graph: PathBuf,

        /// Downgrade a missing entity name to a warning.
        #[arg(long)]
        allow_missing_name: bool,
    },

    /// Deduplicate an emitted JSON-LD document by URN.
    Dedupe {
        /// Path to the JSON-LD graph document.
        graph: PathBuf,

        /// URN merge strategy: first, last, merge_properties.
        #[arg(long, default_value = "merge_properties")]
        urn_merge_strategy: String,

        /// Output path (defaults to rewriting the input in place).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Checkpoint management commands.
#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// List checkpoint IDs.
    List {
        /// Checkpoint directory.
        #[arg(long, default_value = ".checkpoints")]
        checkpoint_dir: PathBuf,
    },
    /// Show one checkpoint's summary.
    Show {
        /// Checkpoint ID.
        #[arg(default_value = "latest")]
        id: String,

        /// Checkpoint directory.
        #[arg(long, default_value = ".checkpoints")]
        checkpoint_dir: PathBuf,
    },
    /// Delete a checkpoint.
    Delete {
        /// Checkpoint ID.
        id: String,

        /// Checkpoint directory.
        #[arg(long, default_value = ".checkpoints")]
        checkpoint_dir: PathBuf,
    },
}
