//! Hybrid chunk planning strategy.
//!
//! Balances directory affinity, a target byte size, and a file-count
//! cap. The `directory`, `size`, and `count` strategies are the same
//! accumulator with one constraint disabled.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::warn;

use super::{Chunk, ChunkPlanner};
use crate::config::{ChunkingConfig, ChunkingStrategy};

/// Hybrid chunk planner.
///
/// Groups files by parent directory (when enabled), then accumulates
/// files in input order, starting a new chunk when the next file would
/// exceed the target size or the count cap. Chunk IDs come from a
/// single monotonically increasing counter across all groups.
#[derive(Debug, Clone)]
pub struct HybridChunker {
    config: ChunkingConfig,
}

impl HybridChunker {
    /// Creates a planner from chunking configuration.
    #[must_use]
    pub const fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Whether directory grouping applies for the configured strategy.
    const fn group_by_directory(&self) -> bool {
        match self.config.strategy {
            ChunkingStrategy::Directory => true,
            ChunkingStrategy::Size | ChunkingStrategy::Count => false,
            ChunkingStrategy::Hybrid => self.config.respect_directory_boundaries,
        }
    }

    /// The effective size limit; `u64::MAX` disables it.
    const fn size_limit(&self) -> u64 {
        match self.config.strategy {
            ChunkingStrategy::Count => u64::MAX,
            _ => self.config.target_size_bytes(),
        }
    }

    /// The effective file-count limit; `usize::MAX` disables it.
    const fn count_limit(&self) -> usize {
        match self.config.strategy {
            ChunkingStrategy::Size => usize::MAX,
            _ => self.config.max_files_per_chunk,
        }
    }

    /// Groups files by immediate parent directory, preserving the
    /// order in which directories first appear.
    fn group_files(files: &[PathBuf]) -> Vec<Vec<PathBuf>> {
        let mut groups: IndexMap<PathBuf, Vec<PathBuf>> = IndexMap::new();
        for file in files {
            let parent = file.parent().map_or_else(PathBuf::new, Path::to_path_buf);
            groups.entry(parent).or_default().push(file.clone());
        }
        groups.into_values().collect()
    }

    /// Chunks one group, consuming IDs from the shared counter.
    fn plan_group(&self, files: &[PathBuf], counter: &mut usize) -> Vec<Chunk> {
        let size_limit = self.size_limit();
        let count_limit = self.count_limit();

        let mut chunks = Vec::new();
        let mut current_files: Vec<PathBuf> = Vec::new();
        let mut current_size: u64 = 0;

        for file in files {
            let file_size = match std::fs::metadata(file) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let would_exceed_size = current_size.saturating_add(file_size) > size_limit;
            let would_exceed_count = current_files.len() >= count_limit;

            if !current_files.is_empty() && (would_exceed_size || would_exceed_count) {
                chunks.push(Self::finish_chunk(&mut current_files, current_size, counter));
                current_size = 0;
            }

            current_files.push(file.clone());
            current_size += file_size;
        }

        if !current_files.is_empty() {
            chunks.push(Self::finish_chunk(&mut current_files, current_size, counter));
        }

        chunks
    }

    fn finish_chunk(files: &mut Vec<PathBuf>, size: u64, counter: &mut usize) -> Chunk {
        let chunk = Chunk {
            chunk_id: format!("chunk-{:03}", *counter),
            files: std::mem::take(files),
            total_size_bytes: size,
        };
        *counter += 1;
        chunk
    }
}

impl ChunkPlanner for HybridChunker {
    fn plan(&self, files: &[PathBuf]) -> Vec<Chunk> {
        if files.is_empty() {
            return Vec::new();
        }

        let groups = if self.group_by_directory() {
            Self::group_files(files)
        } else {
            vec![files.to_vec()]
        };

        let mut counter = 0usize;
        let mut chunks = Vec::new();
        for group in groups {
            chunks.extend(self.plan_group(&group, &mut counter));
        }
        chunks
    }

    fn name(&self) -> &'static str {
        match self.config.strategy {
            ChunkingStrategy::Hybrid => "hybrid",
            ChunkingStrategy::Directory => "directory",
            ChunkingStrategy::Size => "size",
            ChunkingStrategy::Count => "count",
        }
    }
}
