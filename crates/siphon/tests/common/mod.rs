//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use siphon::types::{
    GlobalPosition, Metadata, OperationMode, PartitionKey, Position, SourceEvent, StreamName,
    TargetOperation,
};
use siphon::{
    CheckpointError, CheckpointStore, MemoryCheckpointStore, PassthroughTransform, Sink, SinkError,
    Source, SourceError, Subscription,
};
use tokio::time::Instant;
use uuid::Uuid;

/// Routes pipeline logs to the test harness. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Event whose payload is `"{stream}:{position}"`.
pub fn event(stream: &str, position: u64, global: u64) -> SourceEvent {
    typed_event(stream, position, global, "Test")
}

pub fn typed_event(stream: &str, position: u64, global: u64, event_type: &str) -> SourceEvent {
    SourceEvent {
        id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        stream: StreamName::from(stream),
        stream_position: Position::new(position),
        global_position: GlobalPosition::new(global),
        payload: Bytes::from(format!("{stream}:{position}")),
        content_type: "text/plain".to_string(),
        metadata: Metadata::new(),
        created: Utc::now(),
    }
}

/// Assigns consecutive global positions to `(stream, position)` pairs.
pub fn log(entries: &[(&str, u64)]) -> Vec<SourceEvent> {
    entries
        .iter()
        .enumerate()
        .map(|(i, (stream, position))| event(stream, *position, i as u64 + 1))
        .collect()
}

pub fn passthrough() -> PassthroughTransform {
    PassthroughTransform::new("out", OperationMode::Create)
}

fn label(operation: &TargetOperation) -> String {
    String::from_utf8_lossy(&operation.payload).into_owned()
}

// ============================================================================
// Sinks
// ============================================================================

/// Records every confirmed operation in completion order.
#[derive(Default)]
pub struct RecordingSink {
    confirmed: Mutex<Vec<String>>,
    delays: HashMap<String, Duration>,
    reject_streams: Vec<String>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sleeps for the given duration before confirming the labelled operation.
    pub fn with_delays(delays: &[(&str, u64)]) -> Arc<Self> {
        Arc::new(Self {
            delays: delays
                .iter()
                .map(|(label, ms)| ((*label).to_string(), Duration::from_millis(*ms)))
                .collect(),
            ..Self::default()
        })
    }

    /// Permanently rejects every operation of the given stream.
    pub fn rejecting(stream: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_streams: vec![stream.to_string()],
            ..Self::default()
        })
    }

    pub fn confirmed(&self) -> Vec<String> {
        self.confirmed.lock().clone()
    }

    pub fn confirmed_for(&self, stream: &str) -> Vec<String> {
        let prefix = format!("{stream}:");
        self.confirmed()
            .into_iter()
            .filter(|l| l.starts_with(&prefix))
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, operation: &TargetOperation) -> Result<(), SinkError> {
        let label = label(operation);
        if self
            .reject_streams
            .iter()
            .any(|s| label.starts_with(&format!("{s}:")))
        {
            return Err(SinkError::permanent(format!("rejected {label}")));
        }
        if let Some(delay) = self.delays.get(&label) {
            tokio::time::sleep(*delay).await;
        }
        self.confirmed.lock().push(label);
        Ok(())
    }
}

/// Fails every send with a transient error and records when each call was made.
#[derive(Default)]
pub struct UnavailableSink {
    calls: Mutex<Vec<Instant>>,
}

impl UnavailableSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Sink for UnavailableSink {
    async fn send(&self, _operation: &TargetOperation) -> Result<(), SinkError> {
        self.calls.lock().push(Instant::now());
        Err(SinkError::transient("service unavailable"))
    }
}

/// Never completes a send.
pub struct HangingSink;

#[async_trait]
impl Sink for HangingSink {
    async fn send(&self, _operation: &TargetOperation) -> Result<(), SinkError> {
        std::future::pending().await
    }
}

/// Fails during setup.
pub struct BrokenSetupSink;

#[async_trait]
impl Sink for BrokenSetupSink {
    async fn send(&self, _operation: &TargetOperation) -> Result<(), SinkError> {
        Ok(())
    }

    async fn prepare(&self) -> Result<(), SinkError> {
        Err(SinkError::permanent("index mapping conflict"))
    }
}

// ============================================================================
// Checkpoint stores
// ============================================================================

/// Memory store that also logs every `set` call in order.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCheckpointStore,
    writes: Mutex<Vec<(String, u64)>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<(String, u64)> {
        self.writes.lock().clone()
    }

    /// Positions written for one key, in order.
    pub fn writes_for(&self, key: &str) -> Vec<u64> {
        self.writes()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, position)| position)
            .collect()
    }

    pub fn position(&self, key: &str) -> Option<Position> {
        self.inner.position(key)
    }
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError> {
        self.writes
            .lock()
            .push((key.as_str().to_string(), position.as_u64()));
        self.inner.set(key, position).await
    }
}

/// Memory store that refuses every write for one key.
pub struct ReadOnlyKeyStore {
    inner: MemoryCheckpointStore,
    locked: String,
}

impl ReadOnlyKeyStore {
    pub fn new(locked: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCheckpointStore::new(),
            locked: locked.to_string(),
        })
    }

    pub fn position(&self, key: &str) -> Option<Position> {
        self.inner.position(key)
    }
}

#[async_trait]
impl CheckpointStore for ReadOnlyKeyStore {
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError> {
        if key.as_str() == self.locked {
            return Err(CheckpointError::Unavailable(format!("{key} is read-only")));
        }
        self.inner.set(key, position).await
    }
}

/// Store whose backend cannot be reached.
pub struct UnreachableStore;

#[async_trait]
impl CheckpointStore for UnreachableStore {
    async fn get(&self, _key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        Err(CheckpointError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &PartitionKey, _position: Position) -> Result<(), CheckpointError> {
        Err(CheckpointError::Unavailable("connection refused".to_string()))
    }

    async fn probe(&self) -> Result<(), CheckpointError> {
        Err(CheckpointError::Unavailable("connection refused".to_string()))
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Delivers its events and then stays open without ending.
pub struct OpenEndedSource {
    events: Vec<SourceEvent>,
}

impl OpenEndedSource {
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Source for OpenEndedSource {
    async fn subscribe(&self, _from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        let events = futures::stream::iter(self.events.clone().into_iter().map(Ok));
        Ok(Subscription::new(
            futures::StreamExt::chain(events, futures::stream::pending()),
        ))
    }
}

/// Replays events at or after the requested position and records every
/// requested position.
pub struct TrackingSource {
    events: Vec<SourceEvent>,
    requests: Arc<Mutex<Vec<Option<u64>>>>,
}

impl TrackingSource {
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self {
            events,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Option<u64>>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Source for TrackingSource {
    async fn subscribe(&self, from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        self.requests.lock().push(from.map(|p| p.as_u64()));
        let start = from.unwrap_or(GlobalPosition::START);
        let items: Vec<Result<SourceEvent, SourceError>> = self
            .events
            .iter()
            .filter(|e| e.global_position >= start)
            .cloned()
            .map(Ok)
            .collect();
        Ok(Subscription::new(futures::stream::iter(items)))
    }
}

/// Drops the connection after `cut_after` events on the first subscription.
/// Later subscriptions replay from the requested position to the end.
pub struct DroppingSource {
    events: Vec<SourceEvent>,
    cut_after: usize,
    requests: Arc<Mutex<Vec<Option<u64>>>>,
}

impl DroppingSource {
    pub fn new(events: Vec<SourceEvent>, cut_after: usize) -> Self {
        Self {
            events,
            cut_after,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Option<u64>>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Source for DroppingSource {
    async fn subscribe(&self, from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        let first = {
            let mut requests = self.requests.lock();
            requests.push(from.map(|p| p.as_u64()));
            requests.len() == 1
        };

        let start = from.unwrap_or(GlobalPosition::START);
        let mut items: Vec<Result<SourceEvent, SourceError>> = self
            .events
            .iter()
            .filter(|e| e.global_position >= start)
            .cloned()
            .map(Ok)
            .collect();
        if first {
            items.truncate(self.cut_after);
            items.push(Err(SourceError::Disconnected("connection reset".to_string())));
        }
        Ok(Subscription::new(futures::stream::iter(items)))
    }
}

/// Delivers its events and then fails fatally.
pub struct PoisonedSource {
    events: Vec<SourceEvent>,
}

impl PoisonedSource {
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Source for PoisonedSource {
    async fn subscribe(&self, _from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        let mut items: Vec<Result<SourceEvent, SourceError>> =
            self.events.iter().cloned().map(Ok).collect();
        items.push(Err(SourceError::Fatal("undecodable record".to_string())));
        Ok(Subscription::new(futures::stream::iter(items)))
    }
}
