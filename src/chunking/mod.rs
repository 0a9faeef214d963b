//! Work-unit planning: grouping files into chunks.
//!
//! A chunk is the unit handed to one agent session. Planning honors
//! size, count, and directory-affinity constraints; splitting handles
//! oversized-prompt recovery downstream.

pub mod hybrid;

pub use hybrid::HybridChunker;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionFailure;

/// A contiguous grouping of files handed to one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable chunk identifier (`chunk-NNN`, with `-a`/`-b` suffixes
    /// after splits).
    pub chunk_id: String,
    /// Ordered file paths in this chunk.
    pub files: Vec<PathBuf>,
    /// Total size of all files in bytes.
    pub total_size_bytes: u64,
}

impl Chunk {
    /// Splits this chunk into two halves at the file-list midpoint.
    ///
    /// Sizes are recomputed from the filesystem; files that vanished
    /// since planning count as zero bytes. The halves get `-a`/`-b`
    /// suffixed IDs and may themselves be split again.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionFailure::CannotSplit`] when the chunk holds
    /// fewer than two files.
    pub fn split(&self) -> Result<(Self, Self), ExtractionFailure> {
        if self.files.len() < 2 {
            return Err(ExtractionFailure::CannotSplit {
                chunk_id: self.chunk_id.clone(),
                file_count: self.files.len(),
            });
        }

        let mid = self.files.len() / 2;
        let first_files: Vec<PathBuf> = self.files[..mid].to_vec();
        let second_files: Vec<PathBuf> = self.files[mid..].to_vec();

        let first = Self {
            chunk_id: format!("{}-a", self.chunk_id),
            total_size_bytes: total_size(&first_files),
            files: first_files,
        };
        let second = Self {
            chunk_id: format!("{}-b", self.chunk_id),
            total_size_bytes: total_size(&second_files),
            files: second_files,
        };

        Ok((first, second))
    }
}

/// Sums on-disk sizes, treating missing files as zero bytes.
fn total_size(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|f| std::fs::metadata(f).ok())
        .map(|m| m.len())
        .sum()
}

/// Trait for chunk planning strategies.
///
/// Implementations must be deterministic: the same file list in the
/// same order always yields the same plan.
pub trait ChunkPlanner: Send + Sync {
    /// Partitions a file list into an ordered sequence of chunks.
    fn plan(&self, files: &[PathBuf]) -> Vec<Chunk>;

    /// Returns the name of the planning strategy.
    fn name(&self) -> &'static str;
}
