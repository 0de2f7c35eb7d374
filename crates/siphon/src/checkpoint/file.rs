//! File-backed checkpoint store.
//!
//! One JSON [`CheckpointRecord`] per key. The file name is a sanitized
//! prefix of the key followed by its 64-bit FNV-1a digest in hex, so any
//! stream name maps to a short, safe file name. The record carries the full
//! key and a read checks it, which turns a digest collision into a
//! [`CheckpointError::Corrupt`] instead of a wrong position.
//!
//! Writes go to a temporary file which is fsynced and renamed over the
//! previous record, then the directory itself is fsynced so the rename is
//! durable. A crash leaves either the old or the new checkpoint, never a
//! torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use siphon_types::{CheckpointRecord, PartitionKey, Position};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{CheckpointError, CheckpointStore};
use crate::partition::hash_partition_key;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
/// Characters of the key kept in the file name.
const NAME_PREFIX_CHARS: usize = 48;

/// Checkpoint store that keeps one file per partition key in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `directory`. The directory is created on
    /// [`probe`](CheckpointStore::probe) if missing.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, key: &PartitionKey) -> PathBuf {
        self.directory
            .join(format!("{}.{RECORD_EXTENSION}", file_stem(key)))
    }

    /// Reads every stored record, sorted by key.
    ///
    /// A missing directory yields an empty list.
    pub async fn list(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let mut dir = match fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            records.push(read_record(&path).await?);
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Reads the full record for `key`.
    pub async fn record(&self, key: &PartitionKey) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let path = self.record_path(key);
        match fs::metadata(&path).await {
            Ok(_) => Ok(Some(read_record(&path).await?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_stem(key: &PartitionKey) -> String {
    let prefix: String = key
        .as_str()
        .chars()
        .take(NAME_PREFIX_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hash_partition_key(key.as_bytes()).to_be_bytes();
    format!("{prefix}-{}", hex::encode(digest))
}

#[cfg(unix)]
async fn sync_directory(directory: &Path) -> std::io::Result<()> {
    fs::File::open(directory).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_directory(_directory: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn read_record(path: &Path) -> Result<CheckpointRecord, CheckpointError> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
        key: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &PartitionKey) -> Result<Option<Position>, CheckpointError> {
        let record = self.record(key).await?;
        if let Some(record) = &record {
            if &record.key != key {
                return Err(CheckpointError::Corrupt {
                    key: key.to_string(),
                    reason: format!("record belongs to {}", record.key),
                });
            }
        }
        Ok(record.map(|r| r.position))
    }

    async fn set(&self, key: &PartitionKey, position: Position) -> Result<(), CheckpointError> {
        let record = CheckpointRecord::new(key.clone(), position);
        let encoded = serde_json::to_vec(&record).map_err(|e| CheckpointError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let path = self.record_path(key);
        let temp = path.with_extension(TEMP_EXTENSION);

        let mut file = fs::File::create(&temp).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &path).await?;
        sync_directory(&self.directory).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.directory).await.map_err(|e| {
            CheckpointError::Unavailable(format!("{}: {e}", self.directory.display()))
        })?;
        let metadata = fs::metadata(&self.directory).await?;
        if metadata.permissions().readonly() {
            return Err(CheckpointError::Unavailable(format!(
                "{} is read-only",
                self.directory.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        assert_eq!(store.get(&PartitionKey::from("orders-1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let key = PartitionKey::from("orders-1");

        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();
        store.set(&key, Position::new(3)).await.unwrap();
        store.set(&key, Position::new(4)).await.unwrap();

        let reopened = FileCheckpointStore::new(dir.path());
        assert_eq!(reopened.get(&key).await.unwrap(), Some(Position::new(4)));
    }

    #[tokio::test]
    async fn keys_with_path_separators_are_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        let key = PartitionKey::from("../tenant/orders");
        store.set(&key, Position::new(1)).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(Position::new(1)));
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn long_keys_get_short_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        let long = PartitionKey::new("x".repeat(300));
        let sibling = PartitionKey::new(format!("{}y", "x".repeat(299)));
        store.set(&long, Position::new(7)).await.unwrap();
        store.set(&sibling, Position::new(8)).await.unwrap();

        assert_eq!(store.get(&long).await.unwrap(), Some(Position::new(7)));
        assert_eq!(store.get(&sibling).await.unwrap(), Some(Position::new(8)));
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(name.len() < 100, "{name:?}");
        }
    }

    #[tokio::test]
    async fn set_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        let key = PartitionKey::from("orders-1");
        store.set(&key, Position::new(1)).await.unwrap();
        store.set(&key, Position::new(2)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("orders-1-"), "{names:?}");
        assert!(names[0].ends_with(".json"), "{names:?}");
    }

    #[tokio::test]
    async fn list_returns_sorted_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        store.set(&PartitionKey::from("B"), Position::new(2)).await.unwrap();
        store.set(&PartitionKey::from("A"), Position::new(3)).await.unwrap();

        let records = store.list().await.unwrap();
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.key.as_str().to_string(), r.position.as_u64()))
            .collect();
        assert_eq!(summary, vec![("A".to_string(), 3), ("B".to_string(), 2)]);
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.probe().await.unwrap();

        let key = PartitionKey::from("A");
        std::fs::write(store.record_path(&key), b"not json").unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }
}
