//! JSON-lines target.
//!
//! Appends one line per operation. JSON payloads are embedded as values,
//! anything else as base64.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use siphon::{Sink, SinkError};
use siphon_types::{Metadata, OperationMode, TargetOperation};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct OperationRecord<'a> {
    destination: &'a str,
    mode: OperationMode,
    document: serde_json::Value,
    metadata: &'a Metadata,
}

/// Appends operations to a file, opening it on first use.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    async fn open(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }
}

fn classify(error: &std::io::Error) -> SinkError {
    match error.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            SinkError::transient(error.to_string())
        }
        _ => SinkError::permanent(error.to_string()),
    }
}

fn document(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload).unwrap_or_else(|_| {
        serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(payload))
    })
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn prepare(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify(&e))?;
        }
        let file = self.open().await.map_err(|e| classify(&e))?;
        *self.file.lock().await = Some(file);
        Ok(())
    }

    async fn send(&self, operation: &TargetOperation) -> Result<(), SinkError> {
        let record = OperationRecord {
            destination: &operation.destination,
            mode: operation.mode,
            document: document(&operation.payload),
            metadata: &operation.metadata,
        };
        let mut line =
            serde_json::to_vec(&record).map_err(|e| SinkError::permanent(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await.map_err(|e| classify(&e))?);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await.map_err(|e| classify(&e))?;
            file.flush().await.map_err(|e| classify(&e))?;
        }
        Ok(())
    }
}
