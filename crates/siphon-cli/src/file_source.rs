//! JSON-lines event log.
//!
//! Each non-blank line is one event:
//!
//! ```json
//! {"type":"OrderPlaced","stream":"orders-1","position":1,"data":{"total":12}}
//! ```
//!
//! `global_position` defaults to the 1-based line number, `id` to a value
//! derived from it, so re-reading the file yields identical events.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use siphon::{Source, SourceError, Subscription};
use siphon_types::{GlobalPosition, Metadata, Position, SourceEvent, StreamName};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(rename = "type")]
    event_type: String,
    stream: String,
    position: u64,
    #[serde(default)]
    global_position: Option<u64>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
}

impl EventRecord {
    fn into_event(self, line: u64) -> Result<SourceEvent, serde_json::Error> {
        let global = self.global_position.unwrap_or(line);
        Ok(SourceEvent {
            id: self.id.unwrap_or_else(|| Uuid::from_u128(u128::from(global))),
            event_type: self.event_type,
            stream: StreamName::new(self.stream),
            stream_position: Position::new(self.position),
            global_position: GlobalPosition::new(global),
            payload: Bytes::from(serde_json::to_vec(&self.data)?),
            content_type: "application/json".to_string(),
            metadata: self.metadata,
            created: self.created.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
    }
}

/// Reads events from a JSON-lines file. The file is re-read on every
/// subscription.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn parse(contents: &str, from: GlobalPosition) -> Vec<Result<SourceEvent, SourceError>> {
    let mut items = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let number = index as u64 + 1;
        let parsed = serde_json::from_str::<EventRecord>(line)
            .and_then(|record| record.into_event(number));
        match parsed {
            Ok(event) if event.global_position < from => {}
            Ok(event) => items.push(Ok(event)),
            Err(e) => {
                items.push(Err(SourceError::Fatal(format!("line {number}: {e}"))));
                break;
            }
        }
    }
    items
}

#[async_trait]
impl Source for JsonLinesSource {
    async fn subscribe(&self, from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::Fatal(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let items = parse(&contents, from.unwrap_or(GlobalPosition::START));
        Ok(Subscription::new(futures::stream::iter(items)))
    }
}
