use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use siphon_types::{PartitionKey, Position};

use super::{CheckpointError, CheckpointStore};

/// In-process checkpoint store.
///
/// Progress is lost with the process; useful for embedding, tests, and
/// sinks that are themselves idempotent.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<PartitionKey, Position>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with checkpoints.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, position)| (PartitionKey::new(key), Position::new(position)))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Returns a copy of every stored checkpoint.
    pub fn snapshot(&self) -> HashMap<PartitionKey, Position> {
        self.entries.lock().clone()
    }

    /// Returns the checkpoint for `key` without going through the async API.
    pub fn position(&self, key: &str) -> Option<Position> {
        self.entries.lock().get(&PartitionKey::from(key)).copied()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        Ok(self.entries.lock().get(key).copied())
    }

    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError> {
        self.entries.lock().insert(key.clone(), position);
        Ok(())
    }
}
