//! Top-level extraction flow.
//!
//! Owns the worker pool, the accumulator, checkpoint commits, and
//! progress emission. Workers return results; only the orchestrator
//! mutates shared state, so the accumulator needs no locking.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentTransport, ExtractionWorker};
use crate::checkpoint::{
    Checkpoint, CheckpointStore, DiskCheckpointStore, LATEST_CHECKPOINT_ID,
};
use crate::chunking::{Chunk, ChunkPlanner, HybridChunker};
use crate::config::{CheckpointStrategy, ExtractionConfig};
use crate::dedup::{DedupMetrics, UrnDeduplicator};
use crate::discovery::FileEnumerator;
use crate::error::{Error, ExtractionFailure, Result};
use crate::model::{Entity, ExtractionMetrics, ExtractionResult, UsageMeter, ValidationIssue};
use crate::ratelimit::RateLimitCoordinator;
use crate::validate::{EntityValidator, error_count};

/// Progress callback: `(chunks_done, chunks_total, message)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Final result of an extraction run.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    /// Deduplicated entities in first-insertion URN order.
    pub entities: Vec<Entity>,
    /// Run metrics.
    pub metrics: ExtractionMetrics,
    /// All validation issues (per-chunk and cross-graph).
    pub validation_issues: Vec<ValidationIssue>,
    /// Deduplication pass metrics.
    pub dedup_metrics: DedupMetrics,
}

/// Coordinates discovery, planning, the worker pool, checkpointing,
/// deduplication, and validation.
pub struct Orchestrator {
    config: ExtractionConfig,
    transport: Arc<dyn AgentTransport>,
    store: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimitCoordinator>,
    usage_meter: Arc<UsageMeter>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// Creates an orchestrator with a disk checkpoint store under the
    /// configured checkpoint directory.
    #[must_use]
    pub fn new(config: ExtractionConfig, transport: Arc<dyn AgentTransport>) -> Self {
        let store: Arc<dyn CheckpointStore> = Arc::new(DiskCheckpointStore::new(
            config.checkpoint.checkpoint_dir.clone(),
        ));
        Self::with_store(config, transport, store)
    }

    /// Creates an orchestrator with an explicit checkpoint store.
    #[must_use]
    pub fn with_store(
        config: ExtractionConfig,
        transport: Arc<dyn AgentTransport>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            limiter: Arc::new(RateLimitCoordinator::new()),
            usage_meter: Arc::new(UsageMeter::new()),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Installs a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Returns a token that cancels this run when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared rate-limit gate (for UI observation).
    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimitCoordinator> {
        Arc::clone(&self.limiter)
    }

    /// Executes the full extraction workflow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] before any work begins on an unusable
    /// data root, [`Error::Cancelled`] when the cancel token fires (a
    /// final checkpoint is flushed first), and
    /// [`Error::ValidationFailed`] when error issues remain and
    /// `fail_on_validation_errors` is set. Per-chunk failures never
    /// terminate the run.
    #[allow(clippy::too_many_lines)]
    pub async fn extract(&self) -> Result<OrchestrationResult> {
        let start = Instant::now();

        // 1. Discover files and plan chunks
        let enumerator = match self.config.file_pattern {
            Some(ref pattern) => FileEnumerator::with_pattern(pattern)?,
            None => FileEnumerator::new(),
        };
        let files = enumerator.list_files(&self.config.data_dir)?;
        let planner = HybridChunker::new(self.config.chunking.clone());
        let planned = planner.plan(&files);
        info!(
            files = files.len(),
            chunks = planned.len(),
            strategy = planner.name(),
            "extraction planned"
        );

        // 2. Resume from checkpoint when configured and compatible
        let config_hash = self.config.config_hash()?;
        let mut entities: Vec<Entity> = Vec::new();
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut chunks_processed: usize = 0;
        let mut chunks_skipped: usize = 0;

        if self.config.resume && self.config.checkpoint.enabled {
            match self.store.load(LATEST_CHECKPOINT_ID) {
                Ok(Some(checkpoint)) if checkpoint.config_hash == config_hash => {
                    info!(
                        chunks_processed = checkpoint.chunks_processed,
                        entities = checkpoint.entities_extracted,
                        "resuming from checkpoint"
                    );
                    entities = checkpoint.entities;
                    completed = checkpoint.completed_chunk_ids;
                    chunks_processed = checkpoint.chunks_processed;
                }
                Ok(Some(_)) => {
                    warn!("checkpoint config hash mismatch, processing from scratch");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "checkpoint unusable, processing from scratch");
                }
            }
        }

        let mut pending: VecDeque<Chunk> = planned
            .iter()
            .filter(|c| !completed.contains(&c.chunk_id))
            .cloned()
            .collect();
        chunks_skipped += planned.len() - pending.len();

        // 3. Fan out over the bounded worker pool
        let worker = Arc::new(ExtractionWorker::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.limiter),
            Arc::clone(&self.usage_meter),
            &self.config,
        ));

        let mut total_chunks = planned.len();
        let mut chunks_failed: usize = 0;
        let mut chunk_splits: usize = 0;
        let mut validation_issues: Vec<ValidationIssue> = Vec::new();
        let mut last_save = Instant::now();

        let mut pool: JoinSet<(Chunk, std::result::Result<ExtractionResult, ExtractionFailure>)> =
            JoinSet::new();

        loop {
            while pool.len() < self.config.workers
                && !pending.is_empty()
                && !self.cancel.is_cancelled()
            {
                if let Some(chunk) = pending.pop_front() {
                    let task_worker = Arc::clone(&worker);
                    let task_cancel = self.cancel.clone();
                    pool.spawn(async move {
                        let outcome = task_worker.process_chunk(&chunk, &task_cancel).await;
                        (chunk, outcome)
                    });
                }
            }

            let Some(joined) = pool.join_next().await else {
                if pending.is_empty() || self.cancel.is_cancelled() {
                    break;
                }
                continue;
            };

            let (chunk, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    chunks_failed += 1;
                    warn!(error = %e, "worker task join failed");
                    continue;
                }
            };

            match outcome {
                Ok(result) => {
                    debug!(
                        chunk_id = %chunk.chunk_id,
                        entities = result.entities.len(),
                        "chunk committed"
                    );
                    entities.extend(result.entities);
                    validation_issues.extend(result.validation_issues);
                    completed.insert(chunk.chunk_id.clone());
                    chunks_processed += 1;

                    if let Some(ref callback) = self.progress {
                        callback(
                            chunks_processed,
                            total_chunks,
                            &format!("Processed chunk {}", chunk.chunk_id),
                        );
                    }

                    self.maybe_checkpoint(
                        &config_hash,
                        chunks_processed,
                        &completed,
                        &entities,
                        &mut last_save,
                    );
                }
                Err(ExtractionFailure::RateLimited {
                    retry_after_seconds,
                    ..
                }) => {
                    // Same chunk goes back to the front; no retry
                    // counter advances for throttling
                    debug!(
                        chunk_id = %chunk.chunk_id,
                        retry_after_seconds,
                        "chunk re-enqueued after rate limit"
                    );
                    pending.push_front(chunk);
                }
                Err(ExtractionFailure::PromptTooLong { .. }) => match chunk.split() {
                    Ok((first, second)) => {
                        info!(
                            chunk_id = %chunk.chunk_id,
                            "prompt too long, splitting chunk"
                        );
                        chunk_splits += 1;
                        total_chunks += 1;
                        pending.push_front(second);
                        pending.push_front(first);
                    }
                    Err(_) => {
                        warn!(
                            chunk_id = %chunk.chunk_id,
                            "single-file chunk exceeds the context window, skipping"
                        );
                        chunks_skipped += 1;
                    }
                },
                Err(ExtractionFailure::Cancelled) => {
                    debug!(chunk_id = %chunk.chunk_id, "chunk aborted by cancellation");
                }
                Err(failure) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %failure, "chunk failed");
                    chunks_failed += 1;
                    if self.config.checkpoint.record_failed_as_completed {
                        completed.insert(chunk.chunk_id.clone());
                    }
                }
            }
        }

        // 4. Cancellation: flush a final checkpoint and surface it
        if self.cancel.is_cancelled() {
            self.save_checkpoint(&config_hash, chunks_processed, &completed, &entities);
            return Err(Error::Cancelled);
        }

        // Final commit so a clean resume is a no-op
        self.save_checkpoint(&config_hash, chunks_processed, &completed, &entities);

        // 5. Deduplicate
        let dedup = UrnDeduplicator::new(self.config.deduplication.clone());
        let dedup_result = dedup.deduplicate(entities);

        // 6. Cross-graph validation
        let validator = EntityValidator::new(self.config.validation.clone());
        validation_issues.extend(validator.validate_graph(&dedup_result.entities));

        let (input_tokens, output_tokens, cost_usd) = self.usage_meter.snapshot();
        let metrics = ExtractionMetrics {
            total_chunks,
            chunks_processed,
            chunks_failed,
            chunks_skipped,
            chunk_splits,
            entities_extracted: dedup_result.entities.len(),
            validation_errors: error_count(&validation_issues),
            duration_seconds: start.elapsed().as_secs_f64(),
            actual_input_tokens: input_tokens,
            actual_output_tokens: output_tokens,
            actual_cost_usd: cost_usd,
        };

        if self.config.validation.fail_on_validation_errors && metrics.validation_errors > 0 {
            return Err(Error::ValidationFailed {
                error_count: metrics.validation_errors,
            });
        }

        Ok(OrchestrationResult {
            entities: dedup_result.entities,
            metrics,
            validation_issues,
            dedup_metrics: dedup_result.metrics,
        })
    }

    /// Commits a checkpoint when the configured policy says so.
    fn maybe_checkpoint(
        &self,
        config_hash: &str,
        chunks_processed: usize,
        completed: &BTreeSet<String>,
        entities: &[Entity],
        last_save: &mut Instant,
    ) {
        if !self.config.checkpoint.enabled {
            return;
        }

        let due = match self.config.checkpoint.strategy {
            CheckpointStrategy::PerChunk => true,
            CheckpointStrategy::EveryN => {
                chunks_processed % self.config.checkpoint.every_n_chunks == 0
            }
            CheckpointStrategy::TimeBased => {
                last_save.elapsed()
                    >= Duration::from_secs(self.config.checkpoint.time_interval_minutes * 60)
            }
        };

        if due {
            self.save_checkpoint(config_hash, chunks_processed, completed, entities);
            *last_save = Instant::now();
        }
    }

    /// Saves a checkpoint; failures log and the run proceeds without
    /// persistence.
    fn save_checkpoint(
        &self,
        config_hash: &str,
        chunks_processed: usize,
        completed: &BTreeSet<String>,
        entities: &[Entity],
    ) {
        if !self.config.checkpoint.enabled {
            return;
        }

        let checkpoint = Checkpoint::snapshot(
            LATEST_CHECKPOINT_ID,
            config_hash,
            chunks_processed,
            completed.clone(),
            entities.to_vec(),
        );
        if let Err(e) = self.store.save(&checkpoint) {
            warn!(error = %e, "checkpoint save failed, continuing without persistence");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("transport", &self.transport.name())
            .field("workers", &self.config.workers)
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}
