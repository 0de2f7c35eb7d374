//! # siphon-types: Core types for `Siphon`
//!
//! This crate contains the records that flow through the relay:
//! - Positions ([`Position`], [`GlobalPosition`])
//! - Stream identity ([`StreamName`], [`PartitionKey`])
//! - Source side ([`SourceEvent`], [`Metadata`])
//! - Target side ([`TargetOperation`], [`OperationMode`])
//! - Persisted progress ([`CheckpointRecord`])
//!
//! Payloads are opaque [`Bytes`] tagged with a content type; nothing in this
//! crate interprets them.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    str::FromStr,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Positions - All Copy (cheap 8-byte values)
// ============================================================================

/// Position of an event within its own stream.
///
/// Positions are monotonic per stream. The relay never compares positions
/// belonging to different streams.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Position(u64);

impl Position {
    pub const START: Position = Position(0);

    pub fn new(position: u64) -> Self {
        Self(position)
    }

    /// Returns the position as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

/// Position of an event across the whole source log.
///
/// Used to (re)subscribe; the source delivers events at or after the
/// requested global position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct GlobalPosition(u64);

impl GlobalPosition {
    pub const START: GlobalPosition = GlobalPosition(0);

    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for GlobalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GlobalPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<GlobalPosition> for u64 {
    fn from(position: GlobalPosition) -> Self {
        position.0
    }
}

// ============================================================================
// Stream identity
// ============================================================================

/// Name of the stream (or collection) an event originated from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Key that routes an event to a partition and owns a checkpoint.
///
/// Derived from the stream name, so it is stable for the lifetime of the
/// stream. Two events with the same key are always processed in order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&StreamName> for PartitionKey {
    fn from(stream: &StreamName) -> Self {
        Self(stream.0.clone())
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<[u8]> for PartitionKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

// ============================================================================
// Events and operations
// ============================================================================

/// Free-form string metadata carried alongside payloads.
pub type Metadata = BTreeMap<String, String>;

/// An event as delivered by the source.
///
/// Immutable once read: the pipeline moves it from the dispatcher to exactly
/// one partition worker and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Unique event identifier assigned by the source.
    pub id: Uuid,
    /// Type tag (e.g. `OrderPlaced`).
    pub event_type: String,
    /// Originating stream.
    pub stream: StreamName,
    /// Position within `stream`.
    pub stream_position: Position,
    /// Position within the whole source log.
    pub global_position: GlobalPosition,
    /// Opaque payload.
    pub payload: Bytes,
    /// Content type of `payload` (e.g. `application/json`).
    pub content_type: String,
    pub metadata: Metadata,
    /// When the source recorded the event.
    pub created: DateTime<Utc>,
}

impl SourceEvent {
    /// Returns the key used for partition routing and checkpointing.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::from(&self.stream)
    }
}

/// How the sink should apply an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// Insert; the sink may reject an existing document.
    #[default]
    Create,
    /// Insert or replace.
    Upsert,
    /// Remove the document.
    Delete,
}

impl Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationMode::Create => "create",
            OperationMode::Upsert => "upsert",
            OperationMode::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an [`OperationMode`] from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperationMode(pub String);

impl Display for UnknownOperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown operation mode: {}", self.0)
    }
}

impl std::error::Error for UnknownOperationMode {}

impl FromStr for OperationMode {
    type Err = UnknownOperationMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OperationMode::Create),
            "upsert" => Ok(OperationMode::Upsert),
            "delete" => Ok(OperationMode::Delete),
            _ => Err(UnknownOperationMode(s.to_string())),
        }
    }
}

/// A write request for the sink, produced by a transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOperation {
    /// Destination identifier (index, table, topic).
    pub destination: String,
    pub mode: OperationMode,
    pub payload: Bytes,
    pub metadata: Metadata,
}

impl TargetOperation {
    pub fn new(destination: impl Into<String>, mode: OperationMode, payload: Bytes) -> Self {
        Self {
            destination: destination.into(),
            mode,
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Attaches metadata, replacing any existing entries.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Persisted progress
// ============================================================================

/// Durable record of the last position fully processed for a partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub key: PartitionKey,
    pub position: Position,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(key: PartitionKey, position: Position) -> Self {
        Self {
            key,
            position,
            updated_at: Utc::now(),
        }
    }
}
