//! Event to operation mapping.
//!
//! A [`Transform`] is a pure function from a [`SourceEvent`] to an optional
//! [`TargetOperation`]. `Ok(None)` means "acknowledge and skip": the event is
//! checkpointed but nothing reaches the sink. Transforms run again for
//! redelivered events, so they must not depend on having seen an event
//! before, and they must not perform I/O.
//!
//! An `Err` is treated as a defect in the transform or its configuration and
//! faults the partition; it is never downgraded to a skip.

use std::collections::HashSet;

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use siphon_types::{Metadata, OperationMode, SourceEvent, TargetOperation};

/// A transform rejected an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transform failed for event {event_id} ({event_type}): {reason}")]
pub struct TransformError {
    pub event_id: String,
    pub event_type: String,
    pub reason: String,
}

impl TransformError {
    pub fn new(event: &SourceEvent, reason: impl Into<String>) -> Self {
        Self {
            event_id: event.id.to_string(),
            event_type: event.event_type.clone(),
            reason: reason.into(),
        }
    }
}

/// Maps one source event to zero or one target operation.
pub trait Transform: Send + Sync + 'static {
    fn transform(&self, event: &SourceEvent) -> Result<Option<TargetOperation>, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&SourceEvent) -> Result<Option<TargetOperation>, TransformError> + Send + Sync + 'static,
{
    fn transform(&self, event: &SourceEvent) -> Result<Option<TargetOperation>, TransformError> {
        self(event)
    }
}

// ============================================================================
// Index transform
// ============================================================================

/// Document written by [`IndexTransform`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEvent<'a> {
    message_id: String,
    message_type: &'a str,
    stream_position: u64,
    content_type: &'a str,
    stream: &'a str,
    global_position: u64,
    message: serde_json::Value,
    metadata: &'a Metadata,
    created: DateTime<Utc>,
}

/// Routes every event to a single index as a self-describing document.
///
/// The payload is embedded as JSON when the content type says JSON and the
/// bytes parse; otherwise it is embedded as a base64 string.
#[derive(Debug, Clone)]
pub struct IndexTransform {
    index: String,
    mode: OperationMode,
}

impl IndexTransform {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            mode: OperationMode::Create,
        }
    }

    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        self.mode = mode;
        self
    }
}

fn embed_payload(event: &SourceEvent) -> serde_json::Value {
    if event.content_type.starts_with("application/json") {
        if let Ok(value) = serde_json::from_slice(&event.payload) {
            return value;
        }
    }
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(&event.payload))
}

impl Transform for IndexTransform {
    fn transform(&self, event: &SourceEvent) -> Result<Option<TargetOperation>, TransformError> {
        let document = PersistedEvent {
            message_id: event.id.to_string(),
            message_type: &event.event_type,
            stream_position: event.stream_position.as_u64(),
            content_type: &event.content_type,
            stream: event.stream.as_str(),
            global_position: event.global_position.as_u64(),
            message: embed_payload(event),
            metadata: &event.metadata,
            created: event.created,
        };
        let payload =
            serde_json::to_vec(&document).map_err(|e| TransformError::new(event, e.to_string()))?;

        Ok(Some(
            TargetOperation::new(self.index.clone(), self.mode, Bytes::from(payload))
                .with_metadata(event.metadata.clone()),
        ))
    }
}

// ============================================================================
// Passthrough transform
// ============================================================================

/// Forwards the payload bytes untouched.
#[derive(Debug, Clone)]
pub struct PassthroughTransform {
    destination: String,
    mode: OperationMode,
}

impl PassthroughTransform {
    pub fn new(destination: impl Into<String>, mode: OperationMode) -> Self {
        Self {
            destination: destination.into(),
            mode,
        }
    }
}

impl Transform for PassthroughTransform {
    fn transform(&self, event: &SourceEvent) -> Result<Option<TargetOperation>, TransformError> {
        let mut metadata = event.metadata.clone();
        metadata.insert("content-type".to_string(), event.content_type.clone());
        metadata.insert("event-type".to_string(), event.event_type.clone());
        Ok(Some(
            TargetOperation::new(self.destination.clone(), self.mode, event.payload.clone())
                .with_metadata(metadata),
        ))
    }
}

// ============================================================================
// Type filter
// ============================================================================

/// Skips events by type before delegating to an inner transform.
///
/// An event is skipped when its type is excluded, or when the include list is
/// non-empty and does not contain it.
#[derive(Debug, Clone)]
pub struct TypeFilter<T> {
    include: HashSet<String>,
    exclude: HashSet<String>,
    inner: T,
}

impl<T: Transform> TypeFilter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            include: HashSet::new(),
            exclude: HashSet::new(),
            inner,
        }
    }

    pub fn include<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(types.into_iter().map(Into::into));
        self
    }

    fn admits(&self, event_type: &str) -> bool {
        if self.exclude.contains(event_type) {
            return false;
        }
        self.include.is_empty() || self.include.contains(event_type)
    }
}

impl<T: Transform> Transform for TypeFilter<T> {
    fn transform(&self, event: &SourceEvent) -> Result<Option<TargetOperation>, TransformError> {
        if !self.admits(&event.event_type) {
            return Ok(None);
        }
        self.inner.transform(event)
    }
}
