//! Pipeline coordinator.
//!
//! A [`Pipeline`] wires one [`Source`] subscription to `concurrency_limit`
//! partition workers. The coordinator reads the subscription in source order,
//! routes each event by partition key, and pushes it into that partition's
//! bounded queue. A full queue blocks dispatch, which is the only
//! backpressure the source sees.
//!
//! # Shutdown
//!
//! ```text
//!   shutdown token ──► stop dispatch ──► workers stop admitting
//!                                              │
//!                           in-flight drains for `shutdown_grace`
//!                                              │
//!                              abort token ──► in-flight abandoned
//! ```
//!
//! Abandoned work is never checkpointed, so it is redelivered on the next run.
//!
//! # Where a run starts
//!
//! The subscription's low watermark is loaded from the
//! checkpoint store under [`watermark_key`] and the source is subscribed from
//! it, falling back to `start_from`. During the run the watermark is written
//! every `watermark_interval` when it has advanced, and once more at the end.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use siphon_types::{GlobalPosition, PartitionKey, Position, SourceEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{PipelineError, Result};
use crate::health::{HealthBoard, PartitionReport};
use crate::partition::Partitioner;
use crate::producer::Producer;
use crate::retry::RetryPolicy;
use crate::sink::Sink;
use crate::source::{Source, SourceError};
use crate::transform::Transform;
use crate::watermark::{Watermark, watermark_key};
use crate::worker::{Worker, WorkerExit};

const DEFAULT_MAX_IN_FLIGHT: usize = 64;
const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_WATERMARK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Identifies the subscription in logs.
    pub subscription_id: String,
    /// Number of partitions (and workers).
    pub concurrency_limit: usize,
    /// `None` sends each operation exactly once.
    pub retry: Option<RetryPolicy>,
    /// Wait for each produce before admitting the next event of the partition.
    pub await_produce: bool,
    /// In-flight bound per partition when `await_produce` is off.
    pub max_in_flight: usize,
    /// Capacity of each partition queue.
    pub queue_capacity: usize,
    /// How long in-flight work may drain after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Pause before resubscribing after the source disconnects.
    pub resubscribe_delay: Duration,
    /// Global position to subscribe from when no watermark is stored.
    /// `None` is the start of the log.
    pub start_from: Option<GlobalPosition>,
    /// How often an advanced watermark is persisted during a run.
    pub watermark_interval: Duration,
}

impl PipelineConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            concurrency_limit: 1,
            retry: Some(RetryPolicy::default()),
            await_produce: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
            start_from: None,
            watermark_interval: DEFAULT_WATERMARK_INTERVAL,
        }
    }

    /// In-flight bound actually applied to each worker.
    pub fn effective_in_flight(&self) -> usize {
        if self.await_produce {
            1
        } else {
            self.max_in_flight.max(1)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.await_produce && self.max_in_flight == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.watermark_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "watermark_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Pipeline`] from its four components and a config.
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Arc<dyn Source>>,
    transform: Option<Arc<dyn Transform>>,
    sink: Option<Arc<dyn Sink>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl PipelineBuilder {
    fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            config: PipelineConfig::new(subscription_id),
            source: None,
            transform: None,
            sink: None,
            checkpoints: None,
        }
    }

    /// Replaces every tuning knob except the subscription id.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        let subscription_id = std::mem::take(&mut self.config.subscription_id);
        self.config = PipelineConfig {
            subscription_id,
            ..config
        };
        self
    }

    pub fn subscribe_with(mut self, source: impl Source) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn transform_with(mut self, transform: impl Transform) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Sets the sink together with the produce behaviour.
    pub fn produce_with(mut self, sink: impl Sink, retry: Option<RetryPolicy>, await_produce: bool) -> Self {
        self.sink = Some(Arc::new(sink));
        self.config.retry = retry;
        self.config.await_produce = await_produce;
        self
    }

    pub fn checkpoint_with(mut self, store: impl CheckpointStore) -> Self {
        self.checkpoints = Some(Arc::new(store));
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.config.max_in_flight = max;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.config.resubscribe_delay = delay;
        self
    }

    pub fn start_from(mut self, position: GlobalPosition) -> Self {
        self.config.start_from = Some(position);
        self
    }

    pub fn watermark_interval(mut self, interval: Duration) -> Self {
        self.config.watermark_interval = interval;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let partitioner = Partitioner::new(self.config.concurrency_limit)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        Ok(Pipeline {
            source: self.source.ok_or(PipelineError::MissingComponent("source"))?,
            transform: self.transform.ok_or(PipelineError::MissingComponent("transform"))?,
            sink: self.sink.ok_or(PipelineError::MissingComponent("sink"))?,
            checkpoints: self
                .checkpoints
                .ok_or(PipelineError::MissingComponent("checkpoint store"))?,
            health: HealthBoard::new(partitioner.partitions()),
            partitioner,
            config: self.config,
        })
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Why dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    SourceExhausted,
    Shutdown,
    AllPartitionsFaulted,
}

/// Outcome of a completed [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub end: DispatchEnd,
    /// Events handed to partition queues.
    pub dispatched: u64,
    pub resubscriptions: u32,
    /// Admitted events whose completion was abandoned by the abort.
    pub abandoned: usize,
    /// Subscription watermark at the end of the run.
    pub watermark: Option<GlobalPosition>,
    pub partitions: Vec<PartitionReport>,
}

impl PipelineSummary {
    pub fn faulted(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions.iter().filter(|r| r.health.is_faulted())
    }

    pub fn produced(&self) -> u64 {
        self.partitions.iter().map(|r| r.produced).sum()
    }
}

struct DispatchStats {
    end: DispatchEnd,
    dispatched: u64,
    resubscriptions: u32,
}

// ============================================================================
// Pipeline
// ============================================================================

/// A configured relay, ready to [`run`](Self::run).
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn Source>,
    transform: Arc<dyn Transform>,
    sink: Arc<dyn Sink>,
    checkpoints: Arc<dyn CheckpointStore>,
    partitioner: Partitioner,
    health: HealthBoard,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("partitioner", &self.partitioner)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder(subscription_id: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(subscription_id)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Live health view. Valid before, during, and after `run`.
    pub fn health(&self) -> HealthBoard {
        self.health.clone()
    }

    /// Runs until the source is exhausted, every partition has faulted, or
    /// `shutdown` fires.
    ///
    /// Returns `Err` only for pipeline-wide failures: an unreachable
    /// checkpoint store, a failed sink setup, or a fatal source error.
    #[instrument(
        name = "pipeline",
        skip_all,
        fields(subscription = %self.config.subscription_id, partitions = self.partitioner.partitions())
    )]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<PipelineSummary> {
        self.checkpoints
            .probe()
            .await
            .map_err(PipelineError::CheckpointStoreUnavailable)?;
        self.sink.prepare().await.map_err(PipelineError::SinkSetup)?;
        self.health.reset();

        let mark_key = watermark_key(&self.config.subscription_id);
        let stored = self
            .checkpoints
            .get(&mark_key)
            .await
            .map_err(PipelineError::CheckpointStoreUnavailable)?
            .map(|p| GlobalPosition::new(p.as_u64()));
        let watermark = Watermark::resume(stored);
        let from = stored.or(self.config.start_from);

        let stop_admitting = shutdown.child_token();
        let abort = CancellationToken::new();
        let producer = Arc::new(Producer::from_parts(
            Arc::clone(&self.sink),
            self.config.retry.clone(),
        ));

        let partitions = self.partitioner.partitions();
        let mut queues = Vec::with_capacity(partitions);
        let mut handles = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            let worker = Worker {
                partition,
                transform: Arc::clone(&self.transform),
                producer: Arc::clone(&producer),
                checkpoints: Arc::clone(&self.checkpoints),
                health: self.health.clone(),
                watermark: watermark.clone(),
                max_in_flight: self.config.effective_in_flight(),
                stop_admitting: stop_admitting.clone(),
                abort: abort.clone(),
            };
            handles.push(tokio::spawn(
                worker.run(rx).instrument(info_span!("partition", partition)),
            ));
            queues.push(tx);
        }
        info!(
            in_flight = self.config.effective_in_flight(),
            from = ?from,
            "pipeline started"
        );

        let flush_stop = CancellationToken::new();
        let flusher = tokio::spawn(flush_periodically(
            Arc::clone(&self.checkpoints),
            mark_key.clone(),
            watermark.clone(),
            self.config.watermark_interval,
            flush_stop.clone(),
        ));

        let dispatch = self.dispatch(&queues, &stop_admitting, from, &watermark).await;
        drop(queues);
        if dispatch.is_err() {
            stop_admitting.cancel();
        }

        let joined = join_all(handles);
        tokio::pin!(joined);
        let grace = async {
            stop_admitting.cancelled().await;
            tokio::time::sleep(self.config.shutdown_grace).await;
        };
        let exits = tokio::select! {
            exits = &mut joined => exits,
            () = grace => {
                warn!(
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "shutdown grace elapsed, abandoning in-flight work"
                );
                abort.cancel();
                joined.await
            }
        };

        let mut abandoned = 0;
        for (partition, exit) in exits.into_iter().enumerate() {
            match exit {
                Ok(WorkerExit::Stopped { abandoned: n }) => abandoned += n,
                Ok(WorkerExit::Drained | WorkerExit::Faulted) => {}
                Err(join_error) => {
                    warn!(partition, error = %join_error, "partition worker panicked");
                    self.health
                        .fault(partition, format!("worker panicked: {join_error}"));
                }
            }
        }

        flush_stop.cancel();
        if let Err(join_error) = flusher.await {
            warn!(error = %join_error, "watermark flush task failed");
        }
        flush_watermark(self.checkpoints.as_ref(), &mark_key, &watermark).await;

        let stats = dispatch?;
        let summary = PipelineSummary {
            end: stats.end,
            dispatched: stats.dispatched,
            resubscriptions: stats.resubscriptions,
            abandoned,
            watermark: watermark.current(),
            partitions: self.health.snapshot(),
        };
        info!(
            end = ?summary.end,
            dispatched = summary.dispatched,
            produced = summary.produced(),
            faulted = summary.faulted().count(),
            "pipeline finished"
        );
        Ok(summary)
    }

    /// Reads the source from `start` and routes events until it ends or
    /// `stop` fires. Disconnects are retried from the last dispatched global
    /// position.
    async fn dispatch(
        &self,
        queues: &[mpsc::Sender<SourceEvent>],
        stop: &CancellationToken,
        start: Option<GlobalPosition>,
        watermark: &Watermark,
    ) -> Result<DispatchStats> {
        let mut stats = DispatchStats {
            end: DispatchEnd::SourceExhausted,
            dispatched: 0,
            resubscriptions: 0,
        };
        let mut last_dispatched: Option<GlobalPosition> = None;

        'subscribe: loop {
            let from = last_dispatched.or(start);
            let subscribed = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    stats.end = DispatchEnd::Shutdown;
                    return Ok(stats);
                }
                subscribed = self.source.subscribe(from) => subscribed,
            };

            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(SourceError::Disconnected(reason)) => {
                    if !self.await_resubscribe(&reason, &mut stats, stop).await {
                        return Ok(stats);
                    }
                    continue 'subscribe;
                }
                Err(fatal) => return Err(fatal.into()),
            };
            debug!(from = ?from, "subscribed");

            loop {
                let next = tokio::select! {
                    biased;
                    () = stop.cancelled() => {
                        subscription.cancel();
                        stats.end = DispatchEnd::Shutdown;
                        return Ok(stats);
                    }
                    next = subscription.next() => next,
                };

                let event = match next {
                    None => {
                        stats.end = DispatchEnd::SourceExhausted;
                        return Ok(stats);
                    }
                    Some(Ok(event)) => event,
                    Some(Err(SourceError::Disconnected(reason))) => {
                        drop(subscription);
                        if !self.await_resubscribe(&reason, &mut stats, stop).await {
                            return Ok(stats);
                        }
                        continue 'subscribe;
                    }
                    Some(Err(fatal)) => {
                        subscription.cancel();
                        return Err(fatal.into());
                    }
                };

                let global = event.global_position;
                let partition = self.partitioner.assign(&event);
                // Tracked before the send; an event that never reaches a
                // worker stays pending and holds the watermark back.
                watermark.track(global);
                let sent = tokio::select! {
                    biased;
                    () = stop.cancelled() => {
                        stats.end = DispatchEnd::Shutdown;
                        return Ok(stats);
                    }
                    sent = queues[partition].send(event) => sent,
                };
                last_dispatched = Some(global);

                if sent.is_err() {
                    debug!(partition, %global, "partition closed, event left for redelivery");
                    if queues.iter().all(mpsc::Sender::is_closed) {
                        warn!("every partition has faulted, stopping dispatch");
                        stats.end = DispatchEnd::AllPartitionsFaulted;
                        return Ok(stats);
                    }
                } else {
                    stats.dispatched += 1;
                }
            }
        }
    }

    /// Sleeps `resubscribe_delay` unless stopped first. Returns `false` on stop.
    async fn await_resubscribe(
        &self,
        reason: &str,
        stats: &mut DispatchStats,
        stop: &CancellationToken,
    ) -> bool {
        warn!(
            %reason,
            delay_ms = self.config.resubscribe_delay.as_millis() as u64,
            "source disconnected, resubscribing"
        );
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                stats.end = DispatchEnd::Shutdown;
                false
            }
            () = tokio::time::sleep(self.config.resubscribe_delay) => {
                stats.resubscriptions += 1;
                true
            }
        }
    }
}

/// Persists the watermark if it advanced. A failed write is logged and
/// tried again on the next flush.
async fn flush_watermark(store: &dyn CheckpointStore, key: &PartitionKey, watermark: &Watermark) {
    let Some(position) = watermark.unpersisted() else {
        return;
    };
    match store.set(key, Position::new(position.as_u64())).await {
        Ok(()) => {
            watermark.mark_persisted(position);
            trace!(%position, "watermark persisted");
        }
        Err(e) => warn!(%position, error = %e, "failed to persist watermark"),
    }
}

async fn flush_periodically(
    store: Arc<dyn CheckpointStore>,
    key: PartitionKey,
    watermark: Watermark,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticks.tick() => flush_watermark(store.as_ref(), &key, &watermark).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::source::MemorySource;
    use crate::transform::PassthroughTransform;
    use siphon_types::OperationMode;

    struct NullSink;

    #[async_trait::async_trait]
    impl Sink for NullSink {
        async fn send(&self, _: &siphon_types::TargetOperation) -> std::result::Result<(), crate::sink::SinkError> {
            Ok(())
        }
    }

    #[test]
    fn await_mode_forces_single_in_flight() {
        let mut config = PipelineConfig::new("s");
        config.max_in_flight = 32;
        assert_eq!(config.effective_in_flight(), 1);
        config.await_produce = false;
        assert_eq!(config.effective_in_flight(), 32);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = Pipeline::builder("s")
            .subscribe_with(MemorySource::default())
            .transform_with(PassthroughTransform::new("x", OperationMode::Create))
            .produce_with(NullSink, None, true)
            .checkpoint_with(MemoryCheckpointStore::new())
            .concurrency_limit(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn missing_sink_is_reported() {
        let err = Pipeline::builder("s")
            .subscribe_with(MemorySource::default())
            .transform_with(PassthroughTransform::new("x", OperationMode::Create))
            .checkpoint_with(MemoryCheckpointStore::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingComponent("sink")));
    }

    #[test]
    fn config_keeps_subscription_id() {
        let mut tuned = PipelineConfig::new("ignored");
        tuned.concurrency_limit = 4;
        let pipeline = Pipeline::builder("orders")
            .config(tuned)
            .subscribe_with(MemorySource::default())
            .transform_with(PassthroughTransform::new("x", OperationMode::Create))
            .produce_with(NullSink, None, true)
            .checkpoint_with(MemoryCheckpointStore::new())
            .build()
            .unwrap();
        assert_eq!(pipeline.config().subscription_id, "orders");
        assert_eq!(pipeline.health().partitions(), 4);
    }
}
