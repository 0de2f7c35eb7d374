//! Pipeline error types

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::sink::SinkError;
use crate::source::SourceError;

/// Errors that stop the whole pipeline.
///
/// Failures confined to one partition are not errors at this level; they
/// show up as faulted partitions in the health board and the run summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Checkpoint store unavailable: {0}")]
    CheckpointStoreUnavailable(#[source] CheckpointError),

    #[error("Sink setup failed: {0}")]
    SinkSetup(#[source] SinkError),

    #[error("Source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Pipeline is missing a {0}")]
    MissingComponent(&'static str),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
