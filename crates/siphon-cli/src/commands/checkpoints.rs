//! Checkpoint inspection commands.

use std::path::Path;

use anyhow::{Context, Result};
use siphon::types::{PartitionKey, Position};
use siphon::{CheckpointStore, watermark_key};

use crate::style::{print_success, print_table, print_warn};
use crate::wiring;

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Lists every stored checkpoint, sorted by key.
pub fn list(project: &Path) -> Result<()> {
    let config = super::load_config(project, true)?;
    let store = wiring::checkpoint_store(&config);
    let records = runtime()?
        .block_on(store.list())
        .context("Failed to read checkpoints")?;

    if records.is_empty() {
        print_warn(&format!(
            "No checkpoints in {}",
            store.directory().display()
        ));
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.key.to_string(),
                r.position.to_string(),
                r.updated_at.to_rfc3339(),
            ]
        })
        .collect();
    print_table(&["Key", "Position", "Updated"], &rows, "checkpoint");
    Ok(())
}

/// Overwrites one key's checkpoint. Moving it back replays later events on
/// the next run; moving it forward skips them.
///
/// Rewinding also resets the subscription watermark to the start of the
/// source, since the events to replay may lie below it.
pub fn set(project: &Path, key: &str, position: u64) -> Result<()> {
    let config = super::load_config(project, true)?;
    let store = wiring::checkpoint_store(&config);
    let partition_key = PartitionKey::from(key);
    let watermark = watermark_key(&config.connector.connector_id);
    let position = Position::new(position);

    let rewound = runtime()?
        .block_on(async {
            store.probe().await?;
            let previous = store.get(&partition_key).await?;
            store.set(&partition_key, position).await?;

            let rewound = partition_key != watermark && previous.is_some_and(|p| position < p);
            if rewound {
                store.set(&watermark, Position::START).await?;
            }
            Ok::<_, siphon::CheckpointError>(rewound)
        })
        .with_context(|| format!("Failed to write checkpoint for {key}"))?;

    print_success(&format!("Checkpoint for {key} set to {position}"));
    if rewound {
        print_warn("Subscription watermark reset; the next run reads the source from the start");
    }
    Ok(())
}
