//! CLI command implementations.
//!
//! Contains the business logic for each CLI command. Commands return
//! their rendered output as a string; the binary decides where it
//! goes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::parser::{CheckpointCommands, Cli, Commands};
use super::OutputFormat;
use crate::agent::OpenAiTransport;
use crate::checkpoint::{CheckpointStore, DiskCheckpointStore};
use crate::chunking::{ChunkPlanner, HybridChunker};
use crate::config::{
    CheckpointConfig, ChunkingConfig, DeduplicationConfig, ExtractionConfig, LlmConfig,
    ValidationConfig,
};
use crate::dedup::UrnDeduplicator;
use crate::discovery::FileEnumerator;
use crate::error::{ConfigError, Error, Result};
use crate::model::Severity;
use crate::orchestrator::Orchestrator;
use crate::output::JsonLdGraph;
use crate::validate::{EntityValidator, error_count};

/// Executes the parsed CLI command and returns the rendered output.
///
/// # Errors
///
/// Returns [`Error`] from the underlying pipeline operations.
#[allow(clippy::too_many_lines)]
pub async fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Extract {
            data_dir,
            output_file,
            resume,
            workers,
            pattern,
            schema_dir,
            prompt_dir,
            chunking_strategy,
            chunk_size_mb,
            max_files_per_chunk,
            urn_merge_strategy,
            no_checkpoint,
            checkpoint_dir,
            checkpoint_strategy,
            model,
            max_retries,
            timeout_seconds,
            fail_on_validation_errors,
            allow_missing_name,
            no_detect_orphans,
            no_detect_broken_refs,
        } => {
            let config = build_extract_config(ExtractArgs {
                data_dir,
                output_file,
                resume: *resume,
                workers: *workers,
                pattern,
                schema_dir,
                prompt_dir,
                chunking_strategy,
                chunk_size_mb: *chunk_size_mb,
                max_files_per_chunk: *max_files_per_chunk,
                urn_merge_strategy,
                no_checkpoint: *no_checkpoint,
                checkpoint_dir,
                checkpoint_strategy,
                model,
                max_retries: *max_retries,
                timeout_seconds: *timeout_seconds,
                fail_on_validation_errors: *fail_on_validation_errors,
                allow_missing_name: *allow_missing_name,
                no_detect_orphans: *no_detect_orphans,
                no_detect_broken_refs: *no_detect_broken_refs,
            })?;
            run_extract(config, format).await
        }

        Commands::Plan {
            data_dir,
            pattern,
            chunking_strategy,
            chunk_size_mb,
            max_files_per_chunk,
        } => {
            let chunking = ChunkingConfig {
                strategy: parse_option("chunking.strategy", chunking_strategy)?,
                target_size_mb: *chunk_size_mb,
                max_files_per_chunk: *max_files_per_chunk,
                respect_directory_boundaries: true,
            };
            run_plan(data_dir, pattern.as_deref(), chunking, format)
        }

        Commands::Checkpoint(command) => run_checkpoint(command, format),

        Commands::Validate {
            graph,
            allow_missing_name,
        } => run_validate(graph, *allow_missing_name, format),

        Commands::Dedupe {
            graph,
            urn_merge_strategy,
            output,
        } => run_dedupe(graph, urn_merge_strategy, output.as_deref(), format),
    }
}

struct ExtractArgs<'a> {
    data_dir: &'a PathBuf,
    output_file: &'a PathBuf,
    resume: bool,
    workers: usize,
    pattern: &'a Option<String>,
    schema_dir: &'a Option<PathBuf>,
    prompt_dir: &'a Option<PathBuf>,
    chunking_strategy: &'a str,
    chunk_size_mb: u64,
    max_files_per_chunk: usize,
    urn_merge_strategy: &'a str,
    no_checkpoint: bool,
    checkpoint_dir: &'a PathBuf,
    checkpoint_strategy: &'a str,
    model: &'a Option<String>,
    max_retries: u32,
    timeout_seconds: u64,
    fail_on_validation_errors: bool,
    allow_missing_name: bool,
    no_detect_orphans: bool,
    no_detect_broken_refs: bool,
}

fn build_extract_config(args: ExtractArgs<'_>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .data_dir(args.data_dir)
        .output_file(args.output_file)
        .resume(args.resume)
        .workers(args.workers)
        .chunking(ChunkingConfig {
            strategy: parse_option("chunking.strategy", args.chunking_strategy)?,
            target_size_mb: args.chunk_size_mb,
            max_files_per_chunk: args.max_files_per_chunk,
            respect_directory_boundaries: true,
        })
        .deduplication(DeduplicationConfig {
            urn_merge_strategy: parse_option(
                "deduplication.urn_merge_strategy",
                args.urn_merge_strategy,
            )?,
            ..DeduplicationConfig::default()
        })
        .checkpoint(CheckpointConfig {
            enabled: !args.no_checkpoint,
            strategy: parse_option("checkpoint.strategy", args.checkpoint_strategy)?,
            checkpoint_dir: args.checkpoint_dir.clone(),
            ..CheckpointConfig::default()
        })
        .validation(ValidationConfig {
            allow_missing_name: args.allow_missing_name,
            fail_on_validation_errors: args.fail_on_validation_errors,
            detect_orphans: !args.no_detect_orphans,
            detect_broken_refs: !args.no_detect_broken_refs,
            ..ValidationConfig::default()
        })
        .llm(LlmConfig {
            model: args
                .model
                .clone()
                .unwrap_or_else(|| LlmConfig::default().model),
            max_retries: args.max_retries,
            timeout_seconds: args.timeout_seconds,
            ..LlmConfig::default()
        });

    if let Some(pattern) = args.pattern {
        builder = builder.file_pattern(pattern);
    }
    if let Some(dir) = args.schema_dir {
        builder = builder.schema_dir(dir);
    }
    if let Some(dir) = args.prompt_dir {
        builder = builder.prompt_dir(dir);
    }

    builder.from_env().build()
}

async fn run_extract(config: ExtractionConfig, format: OutputFormat) -> Result<String> {
    let transport = Arc::new(OpenAiTransport::from_env(&config.data_dir)?);
    let output_file = config.output_file.clone();

    let orchestrator = Orchestrator::new(config, transport).with_progress(Box::new(
        |done, total, message| {
            info!(done, total, "{message}");
        },
    ));

    // Ctrl-C flushes a final checkpoint and exits cleanly
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = orchestrator.extract().await?;
    JsonLdGraph::from_entities(&result.entities).save(&output_file)?;

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "output_file": output_file.display().to_string(),
            "entities": result.entities.len(),
            "metrics": result.metrics,
            "dedup": result.dedup_metrics,
            "validation_issues": result.validation_issues,
        }))
        .unwrap_or_default()),
        OutputFormat::Text => {
            let metrics = &result.metrics;
            let mut out = String::new();
            let _ = writeln!(out, "Extraction complete: {}", output_file.display());
            let _ = writeln!(
                out,
                "  chunks: {} processed, {} failed, {} skipped ({} splits)",
                metrics.chunks_processed,
                metrics.chunks_failed,
                metrics.chunks_skipped,
                metrics.chunk_splits,
            );
            let _ = writeln!(out, "  entities: {}", metrics.entities_extracted);
            let _ = writeln!(
                out,
                "  validation: {} error(s), {} issue(s) total",
                metrics.validation_errors,
                result.validation_issues.len(),
            );
            let _ = writeln!(
                out,
                "  tokens: {} in / {} out",
                metrics.actual_input_tokens, metrics.actual_output_tokens,
            );
            let _ = writeln!(out, "  duration: {:.1}s", metrics.duration_seconds);
            Ok(out)
        }
    }
}

fn run_plan(
    data_dir: &Path,
    pattern: Option<&str>,
    chunking: ChunkingConfig,
    format: OutputFormat,
) -> Result<String> {
    let enumerator = match pattern {
        Some(p) => FileEnumerator::with_pattern(p)?,
        None => FileEnumerator::new(),
    };
    let files = enumerator.list_files(data_dir)?;
    let chunks = HybridChunker::new(chunking).plan(&files);

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "files": files.len(),
            "chunks": chunks,
        }))
        .unwrap_or_default()),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "{} file(s) → {} chunk(s)", files.len(), chunks.len());
            for chunk in &chunks {
                let _ = writeln!(
                    out,
                    "  {}: {} file(s), {} bytes",
                    chunk.chunk_id,
                    chunk.files.len(),
                    chunk.total_size_bytes,
                );
            }
            Ok(out)
        }
    }
}

fn run_checkpoint(command: &CheckpointCommands, format: OutputFormat) -> Result<String> {
    match command {
        CheckpointCommands::List { checkpoint_dir } => {
            let store = DiskCheckpointStore::new(checkpoint_dir);
            let ids = store.list().map_err(Error::Store)?;
            match format {
                OutputFormat::Json => {
                    Ok(serde_json::to_string_pretty(&json!({ "checkpoints": ids }))
                        .unwrap_or_default())
                }
                OutputFormat::Text => {
                    if ids.is_empty() {
                        Ok("no checkpoints".to_string())
                    } else {
                        Ok(ids.join("\n"))
                    }
                }
            }
        }
        CheckpointCommands::Show { id, checkpoint_dir } => {
            let store = DiskCheckpointStore::new(checkpoint_dir);
            let checkpoint =
                store
                    .load(id)
                    .map_err(Error::Store)?
                    .ok_or_else(|| Error::InvalidState {
                        message: format!("checkpoint not found: {id}"),
                    })?;
            match format {
                OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
                    "checkpoint_id": checkpoint.checkpoint_id,
                    "config_hash": checkpoint.config_hash,
                    "chunks_processed": checkpoint.chunks_processed,
                    "completed_chunk_ids": checkpoint.completed_chunk_ids,
                    "entities_extracted": checkpoint.entities_extracted,
                    "timestamp": checkpoint.timestamp,
                }))
                .unwrap_or_default()),
                OutputFormat::Text => {
                    let mut out = String::new();
                    let _ = writeln!(out, "checkpoint: {}", checkpoint.checkpoint_id);
                    let _ = writeln!(out, "  config hash: {}", checkpoint.config_hash);
                    let _ = writeln!(out, "  chunks processed: {}", checkpoint.chunks_processed);
                    let _ = writeln!(out, "  entities: {}", checkpoint.entities_extracted);
                    let _ = writeln!(out, "  timestamp: {}", checkpoint.timestamp);
                    Ok(out)
                }
            }
        }
        CheckpointCommands::Delete { id, checkpoint_dir } => {
            let store = DiskCheckpointStore::new(checkpoint_dir);
            store.delete(id).map_err(Error::Store)?;
            Ok(format!("deleted checkpoint: {id}"))
        }
    }
}

fn run_validate(graph: &Path, allow_missing_name: bool, format: OutputFormat) -> Result<String> {
    let doc = JsonLdGraph::load(graph).map_err(Error::Store)?;
    let entities = doc.entities();
    let validator = EntityValidator::new(ValidationConfig {
        allow_missing_name,
        ..ValidationConfig::default()
    });
    let issues = validator.validate_graph(&entities);
    let errors = error_count(&issues);

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "entities": entities.len(),
            "errors": errors,
            "issues": issues,
        }))
        .unwrap_or_default()),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "{} entities, {} issue(s), {} error(s)",
                entities.len(),
                issues.len(),
                errors,
            );
            for issue in &issues {
                let marker = if issue.severity == Severity::Error {
                    "E"
                } else {
                    "W"
                };
                let _ = writeln!(
                    out,
                    "  [{marker}] {} {}: {}",
                    issue.entity_id, issue.field, issue.message,
                );
            }
            Ok(out)
        }
    }
}

fn run_dedupe(
    graph: &Path,
    strategy: &str,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<String> {
    let doc = JsonLdGraph::load(graph).map_err(Error::Store)?;
    let entities = doc.entities();

    let deduper = UrnDeduplicator::new(DeduplicationConfig {
        urn_merge_strategy: parse_option("urn_merge_strategy", strategy)?,
        ..DeduplicationConfig::default()
    });
    let result = deduper.deduplicate(entities);

    let target = output.unwrap_or(graph);
    JsonLdGraph::from_entities(&result.entities)
        .save(target)
        .map_err(Error::Store)?;

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "output_file": target.display().to_string(),
            "metrics": result.metrics,
        }))
        .unwrap_or_default()),
        OutputFormat::Text => Ok(format!(
            "{} → {} entities ({} duplicates merged): {}",
            result.metrics.input_count,
            result.metrics.output_count,
            result.metrics.duplicates_merged,
            target.display(),
        )),
    }
}

/// Parses a strategy string into its enum, mapping failures onto the
/// configuration error surface.
fn parse_option<T: std::str::FromStr<Err = String>>(field: &str, value: &str) -> Result<T> {
    value.parse().map_err(|reason| {
        Error::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            reason,
        })
    })
}
