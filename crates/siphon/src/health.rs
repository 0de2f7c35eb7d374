//! Per-partition health reporting.
//!
//! Workers publish their state and counters to a shared [`HealthBoard`]. The
//! board is created with the pipeline, so callers can hold a handle before
//! `run` starts and poll it while the pipeline is live.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// What a partition worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Reading,
    Transforming,
    Producing,
    Checkpointing,
    Faulted,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Transforming => "transforming",
            Self::Producing => "producing",
            Self::Checkpointing => "checkpointing",
            Self::Faulted => "faulted",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Health of one partition.
///
/// `Faulted` is sticky: once set it is never overwritten by a later stop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionHealth {
    #[default]
    Healthy,
    Faulted { reason: String },
    Stopped,
}

impl PartitionHealth {
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }
}

/// Snapshot of one partition's health and counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionReport {
    pub partition: usize,
    pub health: PartitionHealth,
    pub state: WorkerState,
    /// Operations confirmed by the sink.
    pub produced: u64,
    /// Events the transform mapped to nothing.
    pub skipped: u64,
    /// Redelivered events dropped by the resume filter.
    pub duplicates: u64,
}

/// Shared, cloneable view over every partition's [`PartitionReport`].
#[derive(Debug, Clone)]
pub struct HealthBoard {
    reports: Arc<RwLock<Vec<PartitionReport>>>,
}

impl HealthBoard {
    pub fn new(partitions: usize) -> Self {
        Self {
            reports: Arc::new(RwLock::new(Self::fresh(partitions))),
        }
    }

    fn fresh(partitions: usize) -> Vec<PartitionReport> {
        (0..partitions)
            .map(|partition| PartitionReport {
                partition,
                ..PartitionReport::default()
            })
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PartitionReport> {
        self.reports.read().clone()
    }

    pub fn partition(&self, partition: usize) -> Option<PartitionReport> {
        self.reports.read().get(partition).cloned()
    }

    pub fn partitions(&self) -> usize {
        self.reports.read().len()
    }

    /// True while no partition has faulted.
    pub fn is_healthy(&self) -> bool {
        !self.reports.read().iter().any(|r| r.health.is_faulted())
    }

    /// Clears every report back to `Healthy`/`Idle` with zeroed counters.
    pub(crate) fn reset(&self) {
        let mut reports = self.reports.write();
        let partitions = reports.len();
        *reports = Self::fresh(partitions);
    }

    pub(crate) fn update(&self, partition: usize, f: impl FnOnce(&mut PartitionReport)) {
        if let Some(report) = self.reports.write().get_mut(partition) {
            f(report);
        }
    }

    pub(crate) fn set_state(&self, partition: usize, state: WorkerState) {
        self.update(partition, |r| {
            if !r.health.is_faulted() {
                r.state = state;
            }
        });
    }

    pub(crate) fn fault(&self, partition: usize, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(partition, |r| {
            if !r.health.is_faulted() {
                r.health = PartitionHealth::Faulted { reason };
            }
            r.state = WorkerState::Faulted;
        });
    }

    pub(crate) fn stop(&self, partition: usize) {
        self.update(partition, |r| {
            if !r.health.is_faulted() {
                r.health = PartitionHealth::Stopped;
                r.state = WorkerState::Stopped;
            }
        });
    }
}
