//! Deterministic routing of events to concurrency partitions.
//!
//! `partition = fnv1a(partition_key) % concurrency_limit`. The hash is fixed,
//! so a key lands on the same partition across restarts as long as the
//! concurrency limit is unchanged. Checkpoints are stored per key rather than
//! per partition index, so changing the limit between runs does not misalign
//! resumption; it only moves keys to different workers.

use std::num::NonZeroUsize;

use siphon_types::{PartitionKey, SourceEvent};

/// 64-bit FNV-1a over the key bytes.
///
/// Stable across toolchains and processes, unlike `std`'s `DefaultHasher`.
pub fn hash_partition_key(key: impl AsRef<[u8]>) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.as_ref().iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Error returned for a zero concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency limit must be at least 1")]
pub struct ZeroPartitions;

/// Assigns events to one of `N` partitions by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partitions: NonZeroUsize,
}

impl Partitioner {
    pub fn new(concurrency_limit: usize) -> Result<Self, ZeroPartitions> {
        NonZeroUsize::new(concurrency_limit)
            .map(|partitions| Self { partitions })
            .ok_or(ZeroPartitions)
    }

    /// Number of partitions.
    pub fn partitions(&self) -> usize {
        self.partitions.get()
    }

    /// Partition index for `event`.
    pub fn assign(&self, event: &SourceEvent) -> usize {
        self.assign_key(&event.partition_key())
    }

    /// Partition index for `key`.
    pub fn assign_key(&self, key: &PartitionKey) -> usize {
        // Result is < partitions, which is a usize, so the narrowing is lossless.
        (hash_partition_key(key) % self.partitions.get() as u64) as usize
    }
}
