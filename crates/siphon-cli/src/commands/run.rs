//! Run command: relay events until the source ends or a signal arrives.

use std::path::Path;

use anyhow::{Context, Result, bail};
use siphon::{PartitionHealth, PipelineSummary};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::style::{print_success, print_table, print_warn};
use crate::wiring;

pub fn run(project: &Path, user_config: bool) -> Result<()> {
    let config = super::load_config(project, user_config)?;
    if config.connector.diagnostics.enabled {
        crate::init_tracing(&config.connector.diagnostics.log_level);
    }
    let pipeline = wiring::build_pipeline(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let summary = runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            on_signal.cancel();
        });

        info!(
            service = %config.connector.service_name,
            connector = %config.connector.connector_id,
            "starting connector"
        );
        pipeline.run(shutdown).await
    })?;

    report(&summary);

    let faulted = summary.faulted().count();
    if faulted > 0 {
        bail!("{faulted} partition(s) faulted; fix the cause and re-run to resume");
    }
    Ok(())
}

fn report(summary: &PipelineSummary) {
    let rows: Vec<Vec<String>> = summary
        .partitions
        .iter()
        .map(|r| {
            let health = match &r.health {
                PartitionHealth::Healthy => "healthy".to_string(),
                PartitionHealth::Stopped => "stopped".to_string(),
                PartitionHealth::Faulted { reason } => format!("faulted: {reason}"),
            };
            vec![
                r.partition.to_string(),
                health,
                r.produced.to_string(),
                r.skipped.to_string(),
                r.duplicates.to_string(),
            ]
        })
        .collect();
    print_table(
        &["Partition", "Health", "Produced", "Skipped", "Duplicates"],
        &rows,
        "partition",
    );

    if summary.abandoned > 0 {
        print_warn(&format!(
            "{} in-flight event(s) abandoned at shutdown; they will be redelivered",
            summary.abandoned
        ));
    }
    if summary.faulted().count() == 0 {
        print_success(&format!(
            "Relayed {} event(s), {} produced",
            summary.dispatched,
            summary.produced()
        ));
    }
}

/// Waits for `SIGTERM` or `SIGINT`.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        tracing::warn!("failed to register signal handlers, falling back to ctrl-c");
        ctrl_c(tokio::signal::ctrl_c()).await;
        return;
    };

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = int.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c(tokio::signal::ctrl_c()).await;
}

/// Resolves when `listener` reports ctrl-c. If the listener cannot be
/// installed this never resolves, leaving the run to end on its own.
async fn ctrl_c(listener: impl Future<Output = std::io::Result<()>>) {
    match listener.await {
        Ok(()) => info!("received ctrl-c"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for ctrl-c, signals are ignored");
            std::future::pending::<()>().await;
        }
    }
}
