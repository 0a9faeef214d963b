//! Extraction configuration with builder pattern and environment
//! variable support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables (`KGF_*`) → defaults. The checkpoint config hash covers
//! exactly the fields that affect extraction results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, Error, Result};

/// Default worker pool size.
const DEFAULT_WORKERS: usize = 1;
/// Default chunk target size in megabytes.
const DEFAULT_TARGET_SIZE_MB: u64 = 10;
/// Default maximum files per chunk.
const DEFAULT_MAX_FILES_PER_CHUNK: usize = 100;
/// Default checkpoint cadence for the `every_n` strategy.
const DEFAULT_EVERY_N_CHUNKS: usize = 10;
/// Default checkpoint interval for the `time_based` strategy.
const DEFAULT_TIME_INTERVAL_MINUTES: u64 = 30;
/// Default model identifier.
const DEFAULT_MODEL: &str = "gpt-5-mini-2025-08-07";
/// Default maximum tokens in the agent response.
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default retry budget for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default per-chunk session timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Chunk planning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Directory affinity plus size and count limits.
    Hybrid,
    /// Directory affinity forced on.
    Directory,
    /// Size limit only.
    Size,
    /// File-count limit only.
    Count,
}

impl FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(Self::Hybrid),
            "directory" => Ok(Self::Directory),
            "size" => Ok(Self::Size),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown chunking strategy: {other}")),
        }
    }
}

/// Deduplication pipeline selection.
///
/// The URN pass always runs inside the core. `Agent` and `Hybrid`
/// record that an agent-assisted pass (an external collaborator)
/// should be chained after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// URN-keyed merge only.
    Urn,
    /// Agent-assisted pass after the URN pass.
    Agent,
    /// URN pass, then agent-assisted refinement.
    Hybrid,
}

impl FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "urn" => Ok(Self::Urn),
            "agent" => Ok(Self::Agent),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown deduplication strategy: {other}")),
        }
    }
}

/// How duplicate URNs collapse into one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the earliest inserted record verbatim.
    First,
    /// Keep the latest inserted record verbatim.
    Last,
    /// Merge property bags across duplicates.
    MergeProperties,
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "merge_properties" => Ok(Self::MergeProperties),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// Checkpoint commit cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStrategy {
    /// Save after every completed chunk.
    PerChunk,
    /// Save when `chunks_processed % every_n_chunks == 0`.
    EveryN,
    /// Save when the configured interval has elapsed since last save.
    TimeBased,
}

impl FromStr for CheckpointStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per_chunk" => Ok(Self::PerChunk),
            "every_n" => Ok(Self::EveryN),
            "time_based" => Ok(Self::TimeBased),
            other => Err(format!("unknown checkpoint strategy: {other}")),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Planning strategy.
    pub strategy: ChunkingStrategy,
    /// Target chunk size in megabytes.
    pub target_size_mb: u64,
    /// Maximum files per chunk.
    pub max_files_per_chunk: usize,
    /// Keep files from the same directory together.
    pub respect_directory_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Hybrid,
            target_size_mb: DEFAULT_TARGET_SIZE_MB,
            max_files_per_chunk: DEFAULT_MAX_FILES_PER_CHUNK,
            respect_directory_boundaries: true,
        }
    }
}

impl ChunkingConfig {
    /// Target chunk size in bytes.
    #[must_use]
    pub const fn target_size_bytes(&self) -> u64 {
        self.target_size_mb * 1024 * 1024
    }
}

/// Deduplication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationConfig {
    /// Pipeline selection.
    pub strategy: DedupStrategy,
    /// Merge policy for duplicate URNs.
    pub urn_merge_strategy: MergeStrategy,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            strategy: DedupStrategy::Urn,
            urn_merge_strategy: MergeStrategy::MergeProperties,
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Enable checkpointing.
    pub enabled: bool,
    /// Commit cadence.
    pub strategy: CheckpointStrategy,
    /// Cadence for the `every_n` strategy.
    pub every_n_chunks: usize,
    /// Interval for the `time_based` strategy.
    pub time_interval_minutes: u64,
    /// Directory holding checkpoint files.
    pub checkpoint_dir: PathBuf,
    /// Record chunks that exhausted their retries as completed, so a
    /// resume skips them instead of retrying.
    pub record_failed_as_completed: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CheckpointStrategy::PerChunk,
            every_n_chunks: DEFAULT_EVERY_N_CHUNKS,
            time_interval_minutes: DEFAULT_TIME_INTERVAL_MINUTES,
            checkpoint_dir: PathBuf::from(".checkpoints"),
            record_failed_as_completed: false,
        }
    }
}

/// Validation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Fields required on all entities.
    pub required_fields: Vec<String>,
    /// Downgrade a missing `name` to a warning.
    pub allow_missing_name: bool,
    /// Enforce strict URN format.
    pub strict_urn_format: bool,
    /// Fail the run when error-severity issues remain at the end.
    pub fail_on_validation_errors: bool,
    /// Detect entities with no resolving outgoing references.
    pub detect_orphans: bool,
    /// Detect references to URNs absent from the graph.
    pub detect_broken_refs: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_fields: vec![
                "@id".to_string(),
                "@type".to_string(),
                "name".to_string(),
            ],
            allow_missing_name: false,
            strict_urn_format: true,
            fail_on_validation_errors: false,
            detect_orphans: true,
            detect_broken_refs: true,
        }
    }
}

/// LLM session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier (opaque to the pipeline).
    pub model: String,
    /// Maximum tokens in the agent response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retry budget for transient failures.
    pub max_retries: u32,
    /// Per-chunk session wall-clock timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Main extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Directory containing data to extract from.
    pub data_dir: PathBuf,
    /// Output JSON-LD file path.
    pub output_file: PathBuf,
    /// Attempt checkpoint resume.
    pub resume: bool,
    /// Worker pool size.
    pub workers: usize,
    /// Optional schema reference directory passed to prompts.
    pub schema_dir: Option<PathBuf>,
    /// Optional prompt template directory.
    pub prompt_dir: Option<PathBuf>,
    /// Optional glob filter for file discovery.
    pub file_pattern: Option<String>,
    /// Extra variables merged verbatim into prompt templates.
    pub extra_template_vars: BTreeMap<String, String>,
    /// Chunking configuration.
    pub chunking: ChunkingConfig,
    /// Deduplication configuration.
    pub deduplication: DeduplicationConfig,
    /// Checkpoint configuration.
    pub checkpoint: CheckpointConfig,
    /// Validation configuration.
    pub validation: ValidationConfig,
    /// LLM configuration.
    pub llm: LlmConfig,
}

impl ExtractionConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder::default()
    }

    /// Computes the configuration hash for checkpoint validation.
    ///
    /// The pre-image is the canonical (sorted-key) JSON of the data
    /// root plus the config sections that affect results; retry and
    /// timeout knobs are excluded so tuning them never invalidates a
    /// checkpoint. The result is hex SHA-256 truncated to 16 chars.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Hash`] when serialization fails.
    pub fn config_hash(&self) -> Result<String> {
        let data_dir = self
            .data_dir
            .canonicalize()
            .unwrap_or_else(|_| self.data_dir.clone());

        let llm_subset = serde_json::json!({
            "model": self.llm.model,
            "max_tokens": self.llm.max_tokens,
            "temperature": self.llm.temperature,
        });

        let pre_image = serde_json::json!({
            "data_dir": data_dir.display().to_string(),
            "chunking": self.chunking,
            "deduplication": self.deduplication,
            "validation": self.validation,
            "llm_subset": llm_subset,
        });

        let canonical = canonical_json(&pre_image);
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(hex[..16].to_string())
    }
}

/// Serializes a JSON value with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .filter_map(|k| {
                    map.get(k)
                        .map(|v| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical_json(v)))
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExtractionConfigBuilder {
    data_dir: Option<PathBuf>,
    output_file: Option<PathBuf>,
    resume: Option<bool>,
    workers: Option<usize>,
    schema_dir: Option<PathBuf>,
    prompt_dir: Option<PathBuf>,
    file_pattern: Option<String>,
    extra_template_vars: BTreeMap<String, String>,
    chunking: Option<ChunkingConfig>,
    deduplication: Option<DeduplicationConfig>,
    checkpoint: Option<CheckpointConfig>,
    validation: Option<ValidationConfig>,
    llm: Option<LlmConfig>,
    skip_data_dir_check: bool,
}

impl ExtractionConfigBuilder {
    /// Populates unset fields from `KGF_*` environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.data_dir.is_none() {
            self.data_dir = std::env::var("KGF_DATA_DIR").ok().map(PathBuf::from);
        }
        if self.output_file.is_none() {
            self.output_file = std::env::var("KGF_OUTPUT_FILE").ok().map(PathBuf::from);
        }
        if self.workers.is_none() {
            self.workers = std::env::var("KGF_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("KGF_PROMPT_DIR").ok().map(PathBuf::from);
        }
        if self.schema_dir.is_none() {
            self.schema_dir = std::env::var("KGF_SCHEMA_DIR").ok().map(PathBuf::from);
        }
        if let Ok(model) = std::env::var("KGF_MODEL") {
            let llm = self.llm.get_or_insert_with(LlmConfig::default);
            llm.model = model;
        }
        self
    }

    /// Sets the data root.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the output file path.
    #[must_use]
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Enables or disables checkpoint resume.
    #[must_use]
    pub const fn resume(mut self, resume: bool) -> Self {
        self.resume = Some(resume);
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    /// Sets the schema reference directory.
    #[must_use]
    pub fn schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = Some(dir.into());
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Sets the discovery glob filter.
    #[must_use]
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    /// Adds one extra template variable.
    #[must_use]
    pub fn template_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_template_vars.insert(key.into(), value.into());
        self
    }

    /// Sets the chunking configuration.
    #[must_use]
    pub fn chunking(mut self, config: ChunkingConfig) -> Self {
        self.chunking = Some(config);
        self
    }

    /// Sets the deduplication configuration.
    #[must_use]
    pub fn deduplication(mut self, config: DeduplicationConfig) -> Self {
        self.deduplication = Some(config);
        self
    }

    /// Sets the checkpoint configuration.
    #[must_use]
    pub fn checkpoint(mut self, config: CheckpointConfig) -> Self {
        self.checkpoint = Some(config);
        self
    }

    /// Sets the validation configuration.
    #[must_use]
    pub fn validation(mut self, config: ValidationConfig) -> Self {
        self.validation = Some(config);
        self
    }

    /// Sets the LLM configuration.
    #[must_use]
    pub fn llm(mut self, config: LlmConfig) -> Self {
        self.llm = Some(config);
        self
    }

    /// Skips the data-directory existence check (tests only).
    #[must_use]
    pub const fn skip_data_dir_check(mut self) -> Self {
        self.skip_data_dir_check = true;
        self
    }

    /// Builds the [`ExtractionConfig`], validating ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the data root is missing or a
    /// numeric option is out of range.
    pub fn build(self) -> Result<ExtractionConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config(ConfigError::InvalidValue {
                field: "data_dir".to_string(),
                reason: "data_dir is required".to_string(),
            })
        })?;

        if !self.skip_data_dir_check {
            validate_data_dir(&data_dir)?;
        }

        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "workers".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }

        let chunking = self.chunking.unwrap_or_default();
        if chunking.target_size_mb == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "chunking.target_size_mb".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }
        if chunking.max_files_per_chunk == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "chunking.max_files_per_chunk".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }

        let checkpoint = self.checkpoint.unwrap_or_default();
        if checkpoint.every_n_chunks == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "checkpoint.every_n_chunks".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }
        if checkpoint.time_interval_minutes == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "checkpoint.time_interval_minutes".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }

        let llm = self.llm.unwrap_or_default();
        if llm.timeout_seconds == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "llm.timeout_seconds".to_string(),
                reason: "must be >= 1".to_string(),
            }));
        }

        Ok(ExtractionConfig {
            data_dir,
            output_file: self
                .output_file
                .unwrap_or_else(|| PathBuf::from("knowledge_graph.jsonld")),
            resume: self.resume.unwrap_or(false),
            workers,
            schema_dir: self.schema_dir,
            prompt_dir: self.prompt_dir,
            file_pattern: self.file_pattern,
            extra_template_vars: self.extra_template_vars,
            chunking,
            deduplication: self.deduplication.unwrap_or_default(),
            checkpoint,
            validation: self.validation.unwrap_or_default(),
            llm,
        })
    }
}

/// Ensures the data root exists and is a directory.
fn validate_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(Error::Config(ConfigError::DataDirNotFound {
            path: dir.display().to_string(),
        }));
    }
    if !dir.is_dir() {
        return Err(Error::Config(ConfigError::NotADirectory {
            path: dir.display().to_string(),
        }));
    }
    Ok(())
}
