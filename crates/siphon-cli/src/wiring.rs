//! Builds a [`Pipeline`] from a loaded [`SiphonConfig`].

use std::time::Duration;

use anyhow::{Context, Result};
use siphon::types::{GlobalPosition, OperationMode};
use siphon::{
    FileCheckpointStore, IndexTransform, PassthroughTransform, Pipeline, PipelineConfig,
    RetryPolicy, TypeFilter,
};
use siphon_config::{RetrySettings, SiphonConfig, TargetMode, TransformKind};

use crate::file_sink::JsonLinesSink;
use crate::file_source::JsonLinesSource;

fn operation_mode(mode: TargetMode) -> OperationMode {
    match mode {
        TargetMode::Create => OperationMode::Create,
        TargetMode::Upsert => OperationMode::Upsert,
        TargetMode::Delete => OperationMode::Delete,
    }
}

fn retry_policy(settings: &RetrySettings) -> Option<RetryPolicy> {
    settings.enabled.then(|| {
        RetryPolicy::new(settings.max_attempts)
            .with_backoff(
                Duration::from_millis(settings.initial_backoff_ms),
                Duration::from_millis(settings.max_backoff_ms),
            )
            .with_multiplier(settings.multiplier)
            .with_jitter(settings.jitter)
    })
}

pub fn pipeline_config(config: &SiphonConfig) -> PipelineConfig {
    let settings = &config.pipeline;
    PipelineConfig {
        subscription_id: config.connector.connector_id.clone(),
        concurrency_limit: settings.concurrency_limit,
        retry: retry_policy(&config.retry),
        await_produce: settings.await_produce,
        max_in_flight: settings.max_in_flight,
        queue_capacity: settings.queue_capacity,
        shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
        resubscribe_delay: Duration::from_millis(settings.resubscribe_delay_ms),
        start_from: config.source.from_position.map(GlobalPosition::new),
        watermark_interval: Duration::from_millis(settings.watermark_interval_ms),
    }
}

pub fn checkpoint_store(config: &SiphonConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(&config.checkpoints.directory)
}

pub fn build_pipeline(config: &SiphonConfig) -> Result<Pipeline> {
    let tuned = pipeline_config(config);
    let mode = operation_mode(config.target.mode);
    let index = config.target.index_name.clone();
    let filter = &config.filter;

    let builder = Pipeline::builder(config.connector.connector_id.clone())
        .config(tuned.clone())
        .subscribe_with(JsonLinesSource::new(&config.source.path))
        .produce_with(
            JsonLinesSink::new(&config.target.path),
            tuned.retry,
            tuned.await_produce,
        )
        .checkpoint_with(checkpoint_store(config));

    let builder = match config.target.transform {
        TransformKind::Index => builder.transform_with(
            TypeFilter::new(IndexTransform::new(index).with_mode(mode))
                .include(filter.include_types.iter().cloned())
                .exclude(filter.exclude_types.iter().cloned()),
        ),
        TransformKind::Passthrough => builder.transform_with(
            TypeFilter::new(PassthroughTransform::new(index, mode))
                .include(filter.include_types.iter().cloned())
                .exclude(filter.exclude_types.iter().cloned()),
        ),
    };

    builder.build().context("Failed to build pipeline")
}
