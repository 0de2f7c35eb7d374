//! # Siphon
//!
//! Partitioned subscribe-transform-produce relay.
//!
//! Siphon reads an ordered event log, maps each event to at most one
//! operation on a target system, and applies it with bounded retries. Work is
//! spread over a fixed number of partitions by hashing each event's
//! partition key, so events of one stream stay in order while unrelated
//! streams proceed in parallel. Progress is checkpointed per key after every
//! confirmed (or skipped) event, giving at-least-once delivery across
//! restarts. A subscription-wide low watermark is stored alongside the key
//! checkpoints and sets where the next run subscribes.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐   ┌────────────┐   ┌──────────────────────────────────────┐
//! │ Source │ → │ Dispatcher │ → │ Worker[p]: filter → transform →      │
//! │ (log)  │   │ (hash key) │   │   produce (retry) → checkpoint       │
//! └────────┘   └────────────┘   └──────────────────────────────────────┘
//!                                        │                 │
//!                                      Sink        CheckpointStore
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use siphon::{FileCheckpointStore, IndexTransform, Pipeline, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = Pipeline::builder("orders-to-search")
//!     .subscribe_with(source)
//!     .transform_with(IndexTransform::new("orders"))
//!     .produce_with(sink, Some(RetryPolicy::default()), true)
//!     .checkpoint_with(FileCheckpointStore::new(".siphon/checkpoints"))
//!     .concurrency_limit(4)
//!     .build()?;
//!
//! let summary = pipeline.run(CancellationToken::new()).await?;
//! ```

pub mod checkpoint;
mod error;
mod health;
mod partition;
mod pipeline;
mod producer;
mod retry;
mod sink;
mod source;
mod transform;
mod watermark;
mod worker;

pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::{PipelineError, Result};
pub use health::{HealthBoard, PartitionHealth, PartitionReport, WorkerState};
pub use partition::{Partitioner, ZeroPartitions, hash_partition_key};
pub use pipeline::{DispatchEnd, Pipeline, PipelineBuilder, PipelineConfig, PipelineSummary};
pub use producer::{ProduceError, Producer};
pub use retry::RetryPolicy;
pub use sink::{Sink, SinkError};
pub use source::{MemorySource, Source, SourceError, Subscription};
pub use transform::{IndexTransform, PassthroughTransform, Transform, TransformError, TypeFilter};
pub use watermark::watermark_key;

pub use siphon_types as types;
