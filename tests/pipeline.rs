//! End-to-end pipeline scenarios over a scripted mock transport.
//!
//! Each test builds a real data directory, runs the orchestrator with
//! an in-memory checkpoint store, and scripts the agent's behavior per
//! session.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use kg_forge::agent::{AgentEvent, AgentTransport, EventStream, SessionRequest};
use kg_forge::checkpoint::MemoryCheckpointStore;
use kg_forge::config::{
    ChunkingConfig, ExtractionConfig, LlmConfig, MergeStrategy, ValidationConfig,
};
use kg_forge::error::AgentError;
use kg_forge::model::{Severity, TokenUsage};
use kg_forge::{JsonLdGraph, Orchestrator};

/// What one agent session should do.
#[derive(Clone)]
enum Behavior {
    /// Submit this payload through the capture.
    Submit(Value),
    /// Fail the session with a rate-limit signal.
    RateLimit(u64),
    /// Fail the session with an oversized-prompt signal.
    TooLong,
    /// Fail the session with a transient API error.
    Transient,
}

type Handler = Box<dyn Fn(usize, &[String]) -> Behavior + Send + Sync>;

/// Transport whose behavior is a function of `(call_index, files)`.
struct MockTransport {
    handler: Handler,
    calls: AtomicUsize,
}

impl MockTransport {
    fn new(handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            handler,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Pulls the chunk's file list back out of the rendered prompt.
fn prompt_files(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| {
            line.strip_prefix("- `")
                .and_then(|rest| rest.strip_suffix('`'))
        })
        .map(ToString::to_string)
        .collect()
}

#[async_trait]
impl AgentTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, request: &SessionRequest) -> Result<EventStream, AgentError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let files = prompt_files(&request.prompt);
        let behavior = (self.handler)(index, &files);

        let events: Vec<Result<AgentEvent, AgentError>> = match behavior {
            Behavior::Submit(payload) => {
                let confirmation = request.capture.submit(&payload)?;
                vec![
                    Ok(AgentEvent::ContentDelta {
                        text: "Reading files".to_string(),
                    }),
                    Ok(AgentEvent::Result {
                        text: confirmation,
                        usage: TokenUsage {
                            prompt_tokens: 200,
                            completion_tokens: 80,
                            total_tokens: 280,
                        },
                    }),
                ]
            }
            Behavior::RateLimit(seconds) => vec![Err(AgentError::RateLimited {
                retry_after_seconds: Some(seconds),
            })],
            Behavior::TooLong => vec![Err(AgentError::PromptTooLong {
                message: "Prompt is too long".to_string(),
            })],
            Behavior::Transient => vec![Err(AgentError::Api {
                message: "upstream hiccup".to_string(),
            })],
        };

        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

/// One `urn:Config:<stem>` entity per file, for scripted submissions.
fn entities_for_files(files: &[String]) -> Value {
    let entities: Vec<Value> = files
        .iter()
        .map(|f| {
            let stem = Path::new(f)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown");
            json!({
                "@id": format!("urn:Config:{stem}"),
                "@type": "Config",
                "name": stem,
            })
        })
        .collect();
    let entity_count = entities.len();
    json!({
        "entities": entities,
        "metadata": {"entity_count": entity_count, "files_processed": files.len()}
    })
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, contents);
}

fn base_config(data_dir: &Path) -> ExtractionConfig {
    match ExtractionConfig::builder()
        .data_dir(data_dir)
        .llm(LlmConfig {
            max_retries: 1,
            timeout_seconds: 10,
            ..LlmConfig::default()
        })
        .build()
    {
        Ok(c) => c,
        Err(e) => unreachable!("config build failed: {e}"),
    }
}

fn orchestrator_with(
    config: ExtractionConfig,
    transport: Arc<MockTransport>,
    store: Arc<MemoryCheckpointStore>,
) -> Orchestrator {
    Orchestrator::with_store(config, transport, store)
}

// ---------------------------------------------------------------------------
// Scenario A: single small file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_file_graph_in_submission_order() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(
        &dir.path().join("data/s.yml"),
        "service: payment-api\nowner: alice@example.com\n",
    );

    let payload = json!({
        "entities": [
            {"@id": "urn:Service:payment-api", "@type": "Service", "name": "payment-api",
             "owner": {"@id": "urn:User:alice"}},
            {"@id": "urn:User:alice", "@type": "User", "name": "Alice",
             "email": "alice@example.com"}
        ],
        "metadata": {"entity_count": 2}
    });
    let transport = MockTransport::new(Box::new(move |_, _| Behavior::Submit(payload.clone())));

    let mut config = base_config(dir.path());
    config.validation = ValidationConfig {
        detect_orphans: false,
        ..ValidationConfig::default()
    };

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    let ids: Vec<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["urn:Service:payment-api", "urn:User:alice"]);
    assert!(result.validation_issues.is_empty());
    assert_eq!(result.metrics.chunks_processed, 1);
    assert_eq!(result.metrics.entities_extracted, 2);
    assert_eq!(result.metrics.actual_input_tokens, 200);

    // Emit and re-parse: same entity set in the same order
    let out = dir.path().join("graph.jsonld");
    let _ = JsonLdGraph::from_entities(&result.entities).save(&out);
    let loaded = match JsonLdGraph::load(&out) {
        Ok(d) => d,
        Err(e) => unreachable!("load failed: {e}"),
    };
    assert_eq!(loaded.entities(), result.entities);
}

// ---------------------------------------------------------------------------
// Scenario B: duplicate URN across chunks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_urn_across_chunks_merges_properties() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("us/x.yml"), "region: us\n");
    write_file(&dir.path().join("eu/x.yml"), "region: eu\n");

    let transport = MockTransport::new(Box::new(|_, files| {
        let region = if files.iter().any(|f| f.contains("/us/")) {
            "us"
        } else {
            "eu"
        };
        Behavior::Submit(json!({
            "entities": [
                {"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": region}
            ],
            "metadata": {"entity_count": 1}
        }))
    }));

    let mut config = base_config(dir.path());
    config.deduplication.urn_merge_strategy = MergeStrategy::MergeProperties;
    config.validation.detect_orphans = false;

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    assert_eq!(result.entities.len(), 1);
    let rendered = result.entities[0].to_jsonld();
    // Both regions survive the merge; order depends on chunk completion
    let regions = rendered["region"].as_array().map_or_else(
        || vec![rendered["region"].clone()],
        std::clone::Clone::clone,
    );
    assert_eq!(regions.len(), 2);
    assert!(regions.contains(&json!("us")));
    assert!(regions.contains(&json!("eu")));
    assert_eq!(result.dedup_metrics.duplicates_found, 1);
}

// ---------------------------------------------------------------------------
// Scenario C: oversize chunk splits and both halves succeed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversize_chunk_splits_and_recovers() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    for i in 0..4 {
        write_file(&dir.path().join(format!("svc/f{i}.yml")), "k: v\n");
    }

    let transport = MockTransport::new(Box::new(|_, files| {
        if files.len() >= 4 {
            Behavior::TooLong
        } else {
            Behavior::Submit(entities_for_files(files))
        }
    }));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    assert_eq!(result.metrics.chunks_processed, 2);
    assert_eq!(result.metrics.chunk_splits, 1);
    assert_eq!(result.metrics.chunks_failed, 0);
    assert_eq!(result.entities.len(), 4);
}

// ---------------------------------------------------------------------------
// Scenario C edge: a single oversized file is skipped, run continues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsplittable_oversize_chunk_is_skipped() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("big/huge.yml"), "k: v\n");
    write_file(&dir.path().join("ok/fine.yml"), "k: v\n");

    let transport = MockTransport::new(Box::new(|_, files| {
        if files.iter().any(|f| f.contains("huge")) {
            Behavior::TooLong
        } else {
            Behavior::Submit(entities_for_files(files))
        }
    }));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    assert_eq!(result.metrics.chunks_processed, 1);
    assert_eq!(result.metrics.chunks_skipped, 1);
    assert_eq!(result.entities.len(), 1);
}

// ---------------------------------------------------------------------------
// Scenario D: rate limit pauses, no work lost, no retry counter burn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_pauses_then_all_chunks_complete() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("a/one.yml"), "k: v\n");
    write_file(&dir.path().join("b/two.yml"), "k: v\n");

    let transport = MockTransport::new(Box::new(|index, files| {
        if index == 0 {
            Behavior::RateLimit(1)
        } else {
            Behavior::Submit(entities_for_files(files))
        }
    }));

    let mut config = base_config(dir.path());
    config.workers = 2;
    config.validation.detect_orphans = false;

    let start = Instant::now();
    let orchestrator = orchestrator_with(
        config,
        Arc::clone(&transport),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    assert_eq!(result.metrics.chunks_processed, 2);
    assert_eq!(result.metrics.chunks_failed, 0);
    assert_eq!(result.entities.len(), 2);
    // 1 throttled call + 2 successful calls; the retried chunk spent
    // no transient-retry budget
    assert_eq!(transport.call_count(), 3);
    // The re-enqueued chunk waited out the coordinator deadline
    assert!(start.elapsed().as_millis() >= 900);
}

// ---------------------------------------------------------------------------
// Scenario E: checkpoint resume picks up exactly the unfinished chunks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_processes_only_pending_chunks() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    for i in 0..5 {
        write_file(&dir.path().join(format!("d{i}/cfg{i}.yml")), "k: v\n");
    }

    let store = Arc::new(MemoryCheckpointStore::new());

    // First run: chunks for d3/d4 fail hard, the rest complete
    let failing = MockTransport::new(Box::new(|_, files| {
        if files.iter().any(|f| f.contains("/d3/") || f.contains("/d4/")) {
            Behavior::Transient
        } else {
            Behavior::Submit(entities_for_files(files))
        }
    }));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let first = orchestrator_with(config.clone(), failing, Arc::clone(&store));
    let first_result = match first.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("first run failed: {e}"),
    };
    assert_eq!(first_result.metrics.chunks_processed, 3);
    assert_eq!(first_result.metrics.chunks_failed, 2);

    // Second run resumes; only the two unfinished chunks run
    let healthy = MockTransport::new(Box::new(|_, files| {
        Behavior::Submit(entities_for_files(files))
    }));
    config.resume = true;

    let second = orchestrator_with(config.clone(), Arc::clone(&healthy), Arc::clone(&store));
    let second_result = match second.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("second run failed: {e}"),
    };

    assert_eq!(healthy.call_count(), 2);
    assert_eq!(second_result.metrics.chunks_processed, 5);
    assert_eq!(second_result.metrics.chunks_skipped, 3);
    assert_eq!(second_result.entities.len(), 5);

    // Equal to what one uninterrupted run would have produced
    let uninterrupted_transport = MockTransport::new(Box::new(|_, files| {
        Behavior::Submit(entities_for_files(files))
    }));
    let mut fresh_config = config.clone();
    fresh_config.resume = false;
    let reference = orchestrator_with(
        fresh_config,
        uninterrupted_transport,
        Arc::new(MemoryCheckpointStore::new()),
    );
    let reference_result = match reference.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("reference run failed: {e}"),
    };
    assert_eq!(second_result.entities, reference_result.entities);

    // Resume after a clean run is a no-op
    let idle = MockTransport::new(Box::new(|_, files| {
        Behavior::Submit(entities_for_files(files))
    }));
    let third = orchestrator_with(config, Arc::clone(&idle), store);
    let third_result = match third.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("third run failed: {e}"),
    };
    assert_eq!(idle.call_count(), 0);
    assert_eq!(third_result.entities, second_result.entities);
}

// ---------------------------------------------------------------------------
// Scenario E variant: mismatched config hash forces a fresh run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_ignores_checkpoint_on_config_change() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("a/one.yml"), "k: v\n");

    let store = Arc::new(MemoryCheckpointStore::new());
    let transport = MockTransport::new(Box::new(|_, files| {
        Behavior::Submit(entities_for_files(files))
    }));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let first = orchestrator_with(config.clone(), Arc::clone(&transport), Arc::clone(&store));
    let _ = first.extract().await;
    assert_eq!(transport.call_count(), 1);

    // Change a results-affecting option; the old checkpoint must not apply
    config.resume = true;
    config.chunking = ChunkingConfig {
        target_size_mb: 5,
        ..config.chunking
    };
    let second = orchestrator_with(config, Arc::clone(&transport), store);
    let result = match second.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("second run failed: {e}"),
    };
    assert_eq!(transport.call_count(), 2);
    assert_eq!(result.metrics.chunks_skipped, 0);
}

// ---------------------------------------------------------------------------
// Scenario F: broken reference flagged, entity kept
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broken_reference_reported_entity_kept() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("data/s.yml"), "k: v\n");

    let payload = json!({
        "entities": [
            {"@id": "urn:Service:x", "@type": "Service", "name": "X",
             "ownedBy": {"@id": "urn:Team:ghost"}}
        ],
        "metadata": {"entity_count": 1}
    });
    let transport = MockTransport::new(Box::new(move |_, _| Behavior::Submit(payload.clone())));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    let result = match orchestrator.extract().await {
        Ok(r) => r,
        Err(e) => unreachable!("extract failed: {e}"),
    };

    assert_eq!(result.entities.len(), 1);
    let broken: Vec<_> = result
        .validation_issues
        .iter()
        .filter(|i| i.field == "reference")
        .collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].severity, Severity::Error);
    assert!(broken[0].message.contains("urn:Team:ghost"));
    assert_eq!(result.metrics.validation_errors, 1);
}

// ---------------------------------------------------------------------------
// Cancellation: stop enqueueing, flush checkpoint, surface Cancelled
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_flushes_checkpoint_and_surfaces() {
    let dir = tempfile::tempdir().map_or_else(|e| unreachable!("tempdir: {e}"), |d| d);
    write_file(&dir.path().join("a/one.yml"), "k: v\n");
    write_file(&dir.path().join("b/two.yml"), "k: v\n");

    let transport = MockTransport::new(Box::new(|_, files| {
        Behavior::Submit(entities_for_files(files))
    }));

    let mut config = base_config(dir.path());
    config.validation.detect_orphans = false;

    let orchestrator = orchestrator_with(config, transport, Arc::new(MemoryCheckpointStore::new()));
    orchestrator.cancellation_token().cancel();

    let result = orchestrator.extract().await;
    assert!(matches!(result, Err(kg_forge::Error::Cancelled)));
}
