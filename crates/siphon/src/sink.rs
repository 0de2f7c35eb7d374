//! Sink client contract.

use std::sync::Arc;

use async_trait::async_trait;
use siphon_types::TargetOperation;

/// Failure reported by a sink, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Timeouts, throttling, server-side failures. Worth retrying.
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// Malformed or rejected request. Retrying cannot help.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Raw write client for the target system.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Applies one operation.
    async fn send(&self, operation: &TargetOperation) -> Result<(), SinkError>;

    /// One-off setup before the first send (e.g. create the index). A failure
    /// here stops the pipeline before any partition starts.
    async fn prepare(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Arc<S> {
    async fn send(&self, operation: &TargetOperation) -> Result<(), SinkError> {
        (**self).send(operation).await
    }

    async fn prepare(&self) -> Result<(), SinkError> {
        (**self).prepare().await
    }
}
