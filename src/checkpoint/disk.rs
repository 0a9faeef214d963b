//! Disk-based checkpoint store.
//!
//! One JSON file per checkpoint ID under the checkpoint directory.
//! Writes go to a temp file first and land via rename so concurrent
//! readers never observe a partial checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{CHECKPOINT_VERSION, Checkpoint, CheckpointStore};
use crate::error::StoreError;

/// Checkpoint store persisting to `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct DiskCheckpointStore {
    checkpoint_dir: PathBuf,
}

impl DiskCheckpointStore {
    /// Creates a store rooted at `checkpoint_dir`. The directory is
    /// created lazily on first save.
    #[must_use]
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    fn path_for(&self, checkpoint_id: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{checkpoint_id}.json"))
    }

    fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl CheckpointStore for DiskCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        fs::create_dir_all(&self.checkpoint_dir)
            .map_err(|e| Self::io_error(&self.checkpoint_dir, &e))?;

        let target = self.path_for(&checkpoint.checkpoint_id);
        let temp = self
            .checkpoint_dir
            .join(format!("{}.json.tmp", checkpoint.checkpoint_id));

        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&temp, json).map_err(|e| Self::io_error(&temp, &e))?;
        fs::rename(&temp, &target).map_err(|e| Self::io_error(&target, &e))?;

        debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            entities = checkpoint.entities_extracted,
            "checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(checkpoint_id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| Self::io_error(&path, &e))?;
        let checkpoint: Checkpoint = serde_json::from_str(&contents)?;

        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(StoreError::VersionMismatch {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        Ok(Some(checkpoint))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.checkpoint_dir.exists() {
            return Ok(Vec::new());
        }

        let entries =
            fs::read_dir(&self.checkpoint_dir).map_err(|e| Self::io_error(&self.checkpoint_dir, &e))?;

        let mut ids: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(ToString::to_string)
                } else {
                    None
                }
            })
            .collect();

        ids.sort();
        Ok(ids)
    }

    fn delete(&self, checkpoint_id: &str) -> Result<(), StoreError> {
        let path = self.path_for(checkpoint_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| Self::io_error(&path, &e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample(id: &str) -> Checkpoint {
        let mut completed = BTreeSet::new();
        completed.insert("chunk-000".to_string());
        Checkpoint::snapshot(id, "deadbeefdeadbeef", 1, completed, vec![])
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path().join("checkpoints"));
        let checkpoint = sample("latest");

        match store.save(&checkpoint) {
            Ok(()) => {}
            Err(e) => unreachable!("save failed: {e}"),
        }

        let loaded = match store.load("latest") {
            Ok(Some(c)) => c,
            Ok(None) => unreachable!("checkpoint missing after save"),
            Err(e) => unreachable!("load failed: {e}"),
        };
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_absent_is_none() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());
        assert!(matches!(store.load("nothing"), Ok(None)));
    }

    #[test]
    fn test_save_replaces_existing() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());

        let first = sample("latest");
        let mut second = sample("latest");
        second.chunks_processed = 5;

        let _ = store.save(&first);
        let _ = store.save(&second);

        let loaded = match store.load("latest") {
            Ok(Some(c)) => c,
            other => unreachable!("unexpected load result: {other:?}"),
        };
        assert_eq!(loaded.chunks_processed, 5);
    }

    #[test]
    fn test_list_sorted() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());
        let _ = store.save(&sample("beta"));
        let _ = store.save(&sample("alpha"));

        let ids = match store.list() {
            Ok(ids) => ids,
            Err(e) => unreachable!("list failed: {e}"),
        };
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_list_without_directory() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path().join("never-created"));
        assert_eq!(store.list().unwrap_or_default().len(), 0);
    }

    #[test]
    fn test_delete() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());
        let _ = store.save(&sample("gone"));
        match store.delete("gone") {
            Ok(()) => {}
            Err(e) => unreachable!("delete failed: {e}"),
        }
        assert!(matches!(store.load("gone"), Ok(None)));
        // Deleting again is not an error
        assert!(store.delete("gone").is_ok());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());
        let mut checkpoint = sample("latest");
        checkpoint.version = CHECKPOINT_VERSION + 1;
        let _ = store.save(&checkpoint);

        assert!(matches!(
            store.load("latest"),
            Err(StoreError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let store = DiskCheckpointStore::new(dir.path());
        let _ = store.save(&sample("latest"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
                    .collect()
            })
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }
}
