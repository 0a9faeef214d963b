//! Extraction worker: converts one chunk into validated entities.
//!
//! Per chunk: render the prompt, wait at the rate-limit gate, drive
//! one agent session, take the structured submission (or fall back to
//! text parsing, then one corrective retry), parse and validate the
//! entity records. Transient faults retry in-worker with exponential
//! backoff; rate-limit and oversized-prompt signals escalate to the
//! orchestrator, which owns re-enqueueing and splitting.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::capture::ResultCapture;
use super::event::{AgentEvent, SessionRequest};
use super::parse::parse_submission_text;
use super::tools::ToolSet;
use super::transport::AgentTransport;
use crate::chunking::Chunk;
use crate::config::ExtractionConfig;
use crate::error::{AgentError, ExtractionFailure};
use crate::model::{Entity, ExtractionResult, TokenUsage, UsageMeter, ValidationIssue};
use crate::prompt::{
    PromptSet, SCHEMA_DISCOVERY_PROMPT, SCHEMA_GUIDANCE_PROMPT, render_template,
};
use crate::ratelimit::RateLimitCoordinator;
use crate::validate::EntityValidator;

/// Cooldown applied when the upstream gives no `retry_after` hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Drives one agent session per chunk and validates the result.
pub struct ExtractionWorker {
    transport: Arc<dyn AgentTransport>,
    limiter: Arc<RateLimitCoordinator>,
    usage_meter: Arc<UsageMeter>,
    prompts: PromptSet,
    validator: EntityValidator,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    timeout: Duration,
    schema_dir: Option<PathBuf>,
    extra_vars: BTreeMap<String, String>,
}

impl ExtractionWorker {
    /// Creates a worker wired to the shared transport, gate, and meter.
    #[must_use]
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        limiter: Arc<RateLimitCoordinator>,
        usage_meter: Arc<UsageMeter>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            usage_meter,
            prompts: PromptSet::load(config.prompt_dir.as_deref()),
            validator: EntityValidator::new(config.validation.clone()),
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            max_retries: config.llm.max_retries,
            timeout: Duration::from_secs(config.llm.timeout_seconds),
            schema_dir: config.schema_dir.clone(),
            extra_vars: config.extra_template_vars.clone(),
        }
    }

    /// Processes one chunk to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionFailure`]:
    /// - `RateLimited` after tripping the coordinator (the orchestrator
    ///   re-enqueues this chunk),
    /// - `PromptTooLong` (the orchestrator splits the chunk),
    /// - `Transient` once the retry budget is exhausted,
    /// - `Parse` when the corrective retry also failed,
    /// - `Prompt` on template errors (non-retryable),
    /// - `Cancelled` when the token fires at a suspension point.
    pub async fn process_chunk(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractionFailure> {
        let prompt = self.render_extraction_prompt(chunk)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(chunk, &prompt, cancel).await {
                Err(ExtractionFailure::Transient { cause, .. }) => {
                    if attempt >= self.max_retries.max(1) {
                        return Err(ExtractionFailure::Transient {
                            chunk_id: chunk.chunk_id.clone(),
                            attempts: attempt,
                            cause,
                        });
                    }
                    let backoff = Duration::from_secs(2_u64.saturating_pow(attempt - 1));
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        cause = %cause,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ExtractionFailure::Cancelled),
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// One full session attempt against the transport.
    async fn attempt(
        &self,
        chunk: &Chunk,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractionFailure> {
        if cancel.is_cancelled() {
            return Err(ExtractionFailure::Cancelled);
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(ExtractionFailure::Cancelled),
            () = self.limiter.acquire() => {}
        }

        let capture = Arc::new(ResultCapture::new());
        let request = self.session_request(prompt, &capture);

        let mut usage = TokenUsage::default();
        let terminal_text = self
            .drive_session(chunk, &request, cancel, &mut usage)
            .await?;
        self.usage_meter.record(usage);

        // Prefer the structured submission; fall back to text parsing,
        // then one corrective JSON-only retry.
        let payload = if let Some(submission) = capture.try_take() {
            json!({"entities": submission.entities, "metadata": submission.metadata})
        } else {
            match parse_submission_text(&terminal_text) {
                Ok(value) => value,
                Err(first_err) => {
                    debug!(
                        chunk_id = %chunk.chunk_id,
                        error = %first_err,
                        "no submission and terminal text unparseable, issuing corrective retry"
                    );
                    self.corrective_attempt(chunk, cancel, &capture).await?
                }
            }
        };

        Ok(self.build_result(chunk, payload, usage))
    }

    /// One corrective retry demanding JSON-only output.
    async fn corrective_attempt(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
        capture: &Arc<ResultCapture>,
    ) -> Result<Value, ExtractionFailure> {
        let prompt = render_template(&self.prompts.corrective, &self.template_vars(chunk))?;

        capture.reset();
        let request = self.session_request(&prompt, capture);

        let mut usage = TokenUsage::default();
        let text = self
            .drive_session(chunk, &request, cancel, &mut usage)
            .await?;
        self.usage_meter.record(usage);

        if let Some(submission) = capture.try_take() {
            return Ok(json!({
                "entities": submission.entities,
                "metadata": submission.metadata
            }));
        }
        parse_submission_text(&text).map_err(|e| ExtractionFailure::Parse {
            chunk_id: chunk.chunk_id.clone(),
            message: e.to_string(),
        })
    }

    /// Opens a session and consumes its event stream to the terminal
    /// result, classifying stream errors.
    async fn drive_session(
        &self,
        chunk: &Chunk,
        request: &SessionRequest,
        cancel: &CancellationToken,
        usage: &mut TokenUsage,
    ) -> Result<String, ExtractionFailure> {
        let session = async {
            let mut stream = self
                .transport
                .open(request)
                .await
                .map_err(|e| self.classify(chunk, e))?;

            let mut terminal: Option<String> = None;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(AgentEvent::ToolUse { name, .. }) => {
                        debug!(chunk_id = %chunk.chunk_id, tool = %name, "agent tool use");
                    }
                    Ok(AgentEvent::ContentDelta { .. }) => {}
                    Ok(AgentEvent::Result {
                        text,
                        usage: session_usage,
                    }) => {
                        usage.add(session_usage);
                        terminal = Some(text);
                    }
                    Err(e) => return Err(self.classify(chunk, e)),
                }
            }

            terminal.ok_or_else(|| ExtractionFailure::Transient {
                chunk_id: chunk.chunk_id.clone(),
                attempts: 1,
                cause: "session stream ended without a terminal result".to_string(),
            })
        };

        tokio::select! {
            () = cancel.cancelled() => Err(ExtractionFailure::Cancelled),
            outcome = tokio::time::timeout(self.timeout, session) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ExtractionFailure::Transient {
                    chunk_id: chunk.chunk_id.clone(),
                    attempts: 1,
                    cause: format!("session timed out after {}s", self.timeout.as_secs()),
                }),
            },
        }
    }

    /// Maps a transport error onto the worker failure taxonomy,
    /// tripping the rate-limit gate when appropriate.
    fn classify(&self, chunk: &Chunk, error: AgentError) -> ExtractionFailure {
        match error {
            AgentError::RateLimited {
                retry_after_seconds,
            } => {
                let retry_after = retry_after_seconds.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                self.limiter.trip(Duration::from_secs(retry_after));
                ExtractionFailure::RateLimited {
                    chunk_id: chunk.chunk_id.clone(),
                    retry_after_seconds: retry_after,
                }
            }
            AgentError::PromptTooLong { .. } => ExtractionFailure::PromptTooLong {
                chunk_id: chunk.chunk_id.clone(),
            },
            AgentError::Api { ref message } if is_prompt_too_long(message) => {
                ExtractionFailure::PromptTooLong {
                    chunk_id: chunk.chunk_id.clone(),
                }
            }
            other => ExtractionFailure::Transient {
                chunk_id: chunk.chunk_id.clone(),
                attempts: 1,
                cause: other.to_string(),
            },
        }
    }

    /// Parses and validates entity records from the submission payload.
    fn build_result(&self, chunk: &Chunk, payload: Value, usage: TokenUsage) -> ExtractionResult {
        let records = payload
            .get("entities")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let metadata = payload
            .get("metadata")
            .cloned()
            .unwrap_or(Value::Null);

        let mut entities = Vec::with_capacity(records.len());
        let mut validation_issues = Vec::new();

        for record in &records {
            match Entity::from_jsonld(record) {
                Ok(mut entity) => {
                    normalize_properties(&mut entity);
                    validation_issues.extend(self.validator.validate_entity(&entity));
                    entities.push(entity);
                }
                Err(parse_err) => {
                    // Drop the record, keep the chunk
                    validation_issues.push(ValidationIssue::error(
                        &parse_err.entity_id,
                        parse_err.field,
                        parse_err.message,
                    ));
                }
            }
        }

        debug!(
            chunk_id = %chunk.chunk_id,
            entities = entities.len(),
            issues = validation_issues.len(),
            "chunk extraction complete"
        );

        ExtractionResult {
            chunk_id: chunk.chunk_id.clone(),
            entities,
            validation_issues,
            usage,
            metadata,
        }
    }

    fn session_request(&self, prompt: &str, capture: &Arc<ResultCapture>) -> SessionRequest {
        SessionRequest {
            prompt: prompt.to_string(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools: ToolSet::extraction_tools().into_definitions(),
            capture: Arc::clone(capture),
        }
    }

    fn render_extraction_prompt(&self, chunk: &Chunk) -> Result<String, ExtractionFailure> {
        render_template(&self.prompts.extraction, &self.template_vars(chunk))
    }

    /// Builds the template bindings: file paths, schema guidance, and
    /// any extra variables from configuration (merged verbatim).
    fn template_vars(&self, chunk: &Chunk) -> BTreeMap<String, String> {
        let file_paths = chunk
            .files
            .iter()
            .map(|f| format!("- `{}`", f.display()))
            .collect::<Vec<_>>()
            .join("\n");

        let schema_guidance = self.schema_dir.as_ref().map_or_else(
            || SCHEMA_DISCOVERY_PROMPT.to_string(),
            |dir| {
                SCHEMA_GUIDANCE_PROMPT.replace("{{schema_dir}}", &dir.display().to_string())
            },
        );

        let mut vars = self.extra_vars.clone();
        vars.insert("file_paths".to_string(), file_paths);
        vars.insert("schema_guidance".to_string(), schema_guidance);
        if let Some(ref dir) = self.schema_dir {
            vars.insert("schema_dir".to_string(), dir.display().to_string());
        }
        vars
    }
}

/// Surface forms of the upstream oversized-prompt error.
fn is_prompt_too_long(message: &str) -> bool {
    message.contains("Prompt is too long")
        || message.contains("prompt is too long")
        || message.contains("413")
}

/// Normalizes every property value, dropping values that normalize
/// away entirely.
fn normalize_properties(entity: &mut Entity) {
    let properties = std::mem::take(&mut entity.properties);
    entity.properties = properties
        .into_iter()
        .filter_map(|(key, value)| value.normalize().map(|v| (key, v)))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::event::EventStream;
    use crate::config::ExtractionConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport: plays a fixed sequence of per-session
    /// behaviors, one per `open` call.
    struct ScriptedTransport {
        script: Vec<SessionScript>,
        calls: AtomicUsize,
    }

    #[derive(Clone)]
    enum SessionScript {
        /// Submit this payload through the capture, then finish.
        Submit(Value),
        /// Finish with terminal text only (no submission).
        Text(String),
        /// Fail the stream with this error.
        Fail(fn() -> AgentError),
    }

    impl ScriptedTransport {
        fn new(script: Vec<SessionScript>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn session_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn open(&self, request: &SessionRequest) -> Result<EventStream, AgentError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .get(index.min(self.script.len().saturating_sub(1)))
                .cloned();

            let mut events: Vec<Result<AgentEvent, AgentError>> = Vec::new();
            match step {
                Some(SessionScript::Submit(payload)) => {
                    let confirmation = request.capture.submit(&payload)?;
                    events.push(Ok(AgentEvent::ToolUse {
                        name: crate::agent::tools::SUBMIT_TOOL_NAME.to_string(),
                        input: payload,
                    }));
                    events.push(Ok(AgentEvent::Result {
                        text: confirmation,
                        usage: TokenUsage {
                            prompt_tokens: 100,
                            completion_tokens: 50,
                            total_tokens: 150,
                        },
                    }));
                }
                Some(SessionScript::Text(text)) => {
                    events.push(Ok(AgentEvent::Result {
                        text,
                        usage: TokenUsage::default(),
                    }));
                }
                Some(SessionScript::Fail(make_err)) => {
                    events.push(Err(make_err()));
                }
                None => {
                    events.push(Ok(AgentEvent::Result {
                        text: String::new(),
                        usage: TokenUsage::default(),
                    }));
                }
            }

            Ok(Box::pin(futures_util::stream::iter(events)))
        }
    }

    fn test_config() -> ExtractionConfig {
        match ExtractionConfig::builder()
            .data_dir("/tmp/kgf-worker-test")
            .skip_data_dir_check()
            .build()
        {
            Ok(c) => c,
            Err(e) => unreachable!("config build failed: {e}"),
        }
    }

    fn worker_with(script: Vec<SessionScript>) -> (ExtractionWorker, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let worker = ExtractionWorker::new(
            Arc::clone(&transport) as Arc<dyn AgentTransport>,
            Arc::new(RateLimitCoordinator::new()),
            Arc::new(UsageMeter::new()),
            &test_config(),
        );
        (worker, transport)
    }

    fn chunk() -> Chunk {
        Chunk {
            chunk_id: "chunk-000".to_string(),
            files: vec![PathBuf::from("data/s.yml")],
            total_size_bytes: 64,
        }
    }

    fn submission() -> Value {
        json!({
            "entities": [
                {"@id": "urn:Service:payment-api", "@type": "Service", "name": "payment-api",
                 "owner": {"@id": "urn:User:alice"}},
                {"@id": "urn:User:alice", "@type": "User", "name": "Alice",
                 "email": "alice@example.com"}
            ],
            "metadata": {"entity_count": 2, "files_processed": 1}
        })
    }

    #[tokio::test]
    async fn test_tool_submission_path() {
        let (worker, _) = worker_with(vec![SessionScript::Submit(submission())]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].id, "urn:Service:payment-api");
        assert_eq!(result.usage.total_tokens, 150);
        assert!(result.validation_issues.is_empty());
    }

    #[tokio::test]
    async fn test_text_fallback_path() {
        let text = submission().to_string();
        let (worker, transport) = worker_with(vec![SessionScript::Text(text)]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        assert_eq!(result.entities.len(), 2);
        assert_eq!(transport.session_count(), 1);
    }

    #[tokio::test]
    async fn test_corrective_retry_path() {
        let (worker, transport) = worker_with(vec![
            SessionScript::Text("I have completed the analysis.".to_string()),
            SessionScript::Text(submission().to_string()),
        ]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        assert_eq!(result.entities.len(), 2);
        assert_eq!(transport.session_count(), 2);
    }

    #[tokio::test]
    async fn test_parse_failure_after_corrective_retry() {
        let (worker, _) = worker_with(vec![
            SessionScript::Text("prose only".to_string()),
            SessionScript::Text("still prose".to_string()),
        ]);
        let result = worker.process_chunk(&chunk(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ExtractionFailure::Parse { .. })));
    }

    #[tokio::test]
    async fn test_rate_limit_trips_and_escalates() {
        let (worker, _) = worker_with(vec![SessionScript::Fail(|| AgentError::RateLimited {
            retry_after_seconds: Some(1),
        })]);
        let result = worker.process_chunk(&chunk(), &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ExtractionFailure::RateLimited {
                retry_after_seconds: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_prompt_too_long_escalates() {
        let (worker, _) = worker_with(vec![SessionScript::Fail(|| AgentError::PromptTooLong {
            message: "413".to_string(),
        })]);
        let result = worker.process_chunk(&chunk(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ExtractionFailure::PromptTooLong { .. })));
    }

    #[tokio::test]
    async fn test_embedded_marker_means_prompt_too_long() {
        let (worker, _) = worker_with(vec![SessionScript::Fail(|| AgentError::Api {
            message: "invalid_request_error: Prompt is too long".to_string(),
        })]);
        let result = worker.process_chunk(&chunk(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ExtractionFailure::PromptTooLong { .. })));
    }

    #[tokio::test]
    async fn test_transient_retries_then_succeeds() {
        let (worker, transport) = worker_with(vec![
            SessionScript::Fail(|| AgentError::Stream {
                message: "connection reset".to_string(),
            }),
            SessionScript::Submit(submission()),
        ]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        assert_eq!(result.entities.len(), 2);
        assert_eq!(transport.session_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_exhausts_retry_budget() {
        let (worker, transport) = worker_with(vec![SessionScript::Fail(|| AgentError::Stream {
            message: "connection reset".to_string(),
        })]);
        let result = worker.process_chunk(&chunk(), &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ExtractionFailure::Transient { attempts: 3, .. })
        ));
        assert_eq!(transport.session_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_record_dropped_with_issue() {
        let payload = json!({
            "entities": [
                {"@id": "urn:Service:good", "@type": "Service", "name": "Good"},
                {"@id": "bad-urn", "@type": "Service", "name": "Bad"}
            ],
            "metadata": {}
        });
        // Reaches the worker through the text path (the capture would
        // already reject it at the schema boundary)
        let (worker, _) = worker_with(vec![SessionScript::Text(payload.to_string())]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.validation_issues.len(), 1);
        assert_eq!(result.validation_issues[0].field, "@id");
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (worker, transport) = worker_with(vec![SessionScript::Submit(submission())]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = worker.process_chunk(&chunk(), &cancel).await;
        assert!(matches!(result, Err(ExtractionFailure::Cancelled)));
        assert_eq!(transport.session_count(), 0);
    }

    #[tokio::test]
    async fn test_bare_urn_strings_normalized() {
        let payload = json!({
            "entities": [
                {"@id": "urn:Service:x", "@type": "Service", "name": "X",
                 "dependsOn": "urn:Database:main"}
            ],
            "metadata": {}
        });
        let (worker, _) = worker_with(vec![SessionScript::Submit(payload)]);
        let result = match worker.process_chunk(&chunk(), &CancellationToken::new()).await {
            Ok(r) => r,
            Err(e) => unreachable!("process failed: {e}"),
        };
        let rendered = result.entities[0].to_jsonld();
        assert_eq!(rendered["dependsOn"], json!({"@id": "urn:Database:main"}));
    }
}
