//! Checkpoint persistence for resumable extraction.
//!
//! A checkpoint snapshots orchestrator state after committed chunks so
//! an interrupted run can resume without repeating work. Two stores
//! satisfy the same contract: one on disk, one in memory for tests.

pub mod disk;
pub mod memory;

pub use disk::DiskCheckpointStore;
pub use memory::MemoryCheckpointStore;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::Entity;

/// Checkpoint format version written by this build.
///
/// A loaded checkpoint with a different version is ignored rather than
/// migrated.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Conventional ID for the rolling resume checkpoint.
pub const LATEST_CHECKPOINT_ID: &str = "latest";

/// Snapshot of extraction progress after committed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version.
    pub version: u32,
    /// Checkpoint identifier (conventionally [`LATEST_CHECKPOINT_ID`]).
    pub checkpoint_id: String,
    /// Hash of the extraction configuration and absolute data root.
    pub config_hash: String,
    /// Number of chunks processed so far.
    pub chunks_processed: usize,
    /// Chunk IDs committed so far (supports out-of-order completion).
    pub completed_chunk_ids: BTreeSet<String>,
    /// Total entities accumulated; always equals `entities.len()`.
    pub entities_extracted: usize,
    /// Accumulated entity records.
    pub entities: Vec<Entity>,
    /// When this checkpoint was created.
    pub timestamp: DateTime<Utc>,
    /// Additional checkpoint metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Checkpoint {
    /// Builds a checkpoint from the orchestrator's accumulator state.
    #[must_use]
    pub fn snapshot(
        checkpoint_id: &str,
        config_hash: &str,
        chunks_processed: usize,
        completed_chunk_ids: BTreeSet<String>,
        entities: Vec<Entity>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            checkpoint_id: checkpoint_id.to_string(),
            config_hash: config_hash.to_string(),
            chunks_processed,
            completed_chunk_ids,
            entities_extracted: entities.len(),
            entities,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Durable persistence of [`Checkpoint`] records keyed by ID.
///
/// After a successful `save`, any subsequent `load` in the same or a
/// later process observes the new state.
pub trait CheckpointStore: Send + Sync {
    /// Writes or replaces a checkpoint, atomically with respect to
    /// concurrent readers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failures.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Loads a checkpoint; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionMismatch`] when the stored format
    /// version differs from this build, or other [`StoreError`]s on
    /// read failures.
    fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Lists checkpoint IDs in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Deletes a checkpoint; deleting a missing ID is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failures.
    fn delete(&self, checkpoint_id: &str) -> Result<(), StoreError>;
}
