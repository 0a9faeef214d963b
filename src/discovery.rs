//! File discovery under the data root.
//!
//! Walks the data directory and returns a deterministically ordered
//! list of regular files. Order is lexicographic by absolute path so
//! chunk planning is reproducible across runs and platforms.

use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{ConfigError, Error, Result};

/// Enumerates regular files under a data root.
#[derive(Debug, Clone, Default)]
pub struct FileEnumerator {
    pattern: Option<Pattern>,
}

impl FileEnumerator {
    /// Creates an enumerator that returns every regular file.
    #[must_use]
    pub const fn new() -> Self {
        Self { pattern: None }
    }

    /// Creates an enumerator filtered by a glob pattern.
    ///
    /// The pattern is matched against the path relative to the root
    /// (e.g. `**/*.yml`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the pattern does not
    /// compile.
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let compiled = Pattern::new(pattern).map_err(|e| {
            Error::Config(ConfigError::InvalidValue {
                field: "pattern".to_string(),
                reason: format!("invalid glob '{pattern}': {e}"),
            })
        })?;
        Ok(Self {
            pattern: Some(compiled),
        })
    }

    /// Lists regular files under `root` in lexicographic order of
    /// their absolute paths.
    ///
    /// Symlinks are followed; link cycles and unreadable entries are
    /// skipped with a warning. Non-regular files are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataDirNotFound`] or
    /// [`ConfigError::NotADirectory`] when the root is unusable.
    pub fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(Error::Config(ConfigError::DataDirNotFound {
                path: root.display().to_string(),
            }));
        }
        if !root.is_dir() {
            return Err(Error::Config(ConfigError::NotADirectory {
                path: root.display().to_string(),
            }));
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // Symlink loops and permission failures land here
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ref pattern) = self.pattern {
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if !pattern.matches_path(relative) {
                    continue;
                }
            }
            files.push(entry.into_path());
        }

        files.sort();
        Ok(files)
    }
}
