//! In-memory checkpoint store for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Checkpoint, CheckpointStore};
use crate::error::StoreError;

/// Checkpoint store backed by a map; nothing touches the disk.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|e| StoreError::Serialization(format!("lock poisoned: {e}")))?;
        guard.insert(checkpoint.checkpoint_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let guard = self
            .checkpoints
            .lock()
            .map_err(|e| StoreError::Serialization(format!("lock poisoned: {e}")))?;
        Ok(guard.get(checkpoint_id).cloned())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let guard = self
            .checkpoints
            .lock()
            .map_err(|e| StoreError::Serialization(format!("lock poisoned: {e}")))?;
        Ok(guard.keys().cloned().collect())
    }

    fn delete(&self, checkpoint_id: &str) -> Result<(), StoreError> {
        let mut guard = self
            .checkpoints
            .lock()
            .map_err(|e| StoreError::Serialization(format!("lock poisoned: {e}")))?;
        guard.remove(checkpoint_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample(id: &str) -> Checkpoint {
        Checkpoint::snapshot(id, "cafebabecafebabe", 0, BTreeSet::new(), vec![])
    }

    #[test]
    fn test_roundtrip() {
        let store = MemoryCheckpointStore::new();
        let checkpoint = sample("latest");
        let _ = store.save(&checkpoint);
        assert_eq!(store.load("latest").unwrap_or_default(), Some(checkpoint));
    }

    #[test]
    fn test_list_sorted_and_delete() {
        let store = MemoryCheckpointStore::new();
        let _ = store.save(&sample("b"));
        let _ = store.save(&sample("a"));
        assert_eq!(
            store.list().unwrap_or_default(),
            vec!["a".to_string(), "b".to_string()]
        );

        let _ = store.delete("a");
        assert_eq!(store.list().unwrap_or_default(), vec!["b".to_string()]);
        assert!(matches!(store.load("a"), Ok(None)));
    }
}
