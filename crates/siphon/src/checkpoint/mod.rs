//! Checkpoint persistence.
//!
//! A checkpoint maps a [`PartitionKey`] to the last [`Position`] that was
//! durably produced (or deliberately skipped) for that key. Workers read a
//! key's checkpoint once, on first sight, and write it after every
//! completion. Each key is only ever touched by the worker that owns it, so
//! implementations need no cross-key coordination.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use std::sync::Arc;

use async_trait::async_trait;
use siphon_types::{PartitionKey, Position};

/// Errors from a checkpoint backend.
///
/// Every variant is partition-fatal: a worker that cannot read or record
/// progress cannot advance safely.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying filesystem error.
    #[error("checkpoint I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("corrupt checkpoint for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The backend cannot be reached at all.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Durable key to position store.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Returns the last recorded position for `key`, or `None` if the key has
    /// never been checkpointed (start of stream).
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError>;

    /// Records `position` as fully processed for `key`.
    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError>;

    /// Checks that the backend is reachable. Called once before any worker
    /// starts; a failure aborts the whole pipeline.
    async fn probe(&self) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[async_trait]
impl<S: CheckpointStore + ?Sized> CheckpointStore for Arc<S> {
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError> {
        (**self).set(key, position).await
    }

    async fn probe(&self) -> Result<(), CheckpointError> {
        (**self).probe().await
    }
}
