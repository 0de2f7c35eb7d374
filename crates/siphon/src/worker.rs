//! Partition worker.
//!
//! One worker owns one partition. It admits events from its queue, filters
//! redeliveries against per-key checkpoints, runs the transform, hands
//! operations to the producer, and records checkpoints strictly in admission
//! order.
//!
//! In-flight work is a [`FuturesOrdered`] bounded by `max_in_flight`. With a
//! bound of one the worker awaits each produce before admitting the next
//! event; with a larger bound sends overlap but completions are still
//! consumed in admission order, so a checkpoint never moves past an event
//! whose produce has not been confirmed.
//!
//! Every event's global position is settled on the subscription
//! [`Watermark`] once it is checkpointed, skipped or dropped as a
//! redelivery.
//!
//! Two tokens steer shutdown: `stop_admitting` makes the worker drain what is
//! already in flight, `abort` abandons in-flight work immediately.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesOrdered, StreamExt};
use siphon_types::{GlobalPosition, PartitionKey, Position, SourceEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::checkpoint::CheckpointStore;
use crate::health::{HealthBoard, WorkerState};
use crate::producer::{ProduceError, Producer};
use crate::transform::Transform;
use crate::watermark::Watermark;

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// Queue closed and everything in flight completed.
    Drained,
    /// Stopped by shutdown; `abandoned` completions were never checkpointed.
    Stopped { abandoned: usize },
    Faulted,
}

enum Outcome {
    Produced,
    Skipped,
    Failed(ProduceError),
}

struct Completion {
    key: PartitionKey,
    position: Position,
    global: GlobalPosition,
    outcome: Outcome,
}

/// Resume bookkeeping for one key.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    /// Last durably recorded position.
    checkpoint: Option<Position>,
    /// Last position handed to the transform.
    admitted: Option<Position>,
}

impl Cursor {
    fn is_duplicate(&self, position: Position) -> bool {
        self.checkpoint.max(self.admitted).is_some_and(|floor| position <= floor)
    }
}

pub(crate) struct Worker {
    pub partition: usize,
    pub transform: Arc<dyn Transform>,
    pub producer: Arc<Producer>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub health: HealthBoard,
    pub watermark: Watermark,
    pub max_in_flight: usize,
    pub stop_admitting: CancellationToken,
    pub abort: CancellationToken,
}

type InFlight = FuturesOrdered<BoxFuture<'static, Completion>>;

impl Worker {
    pub(crate) async fn run(self, mut queue: mpsc::Receiver<SourceEvent>) -> WorkerExit {
        let mut inflight: InFlight = FuturesOrdered::new();
        let mut cursors: HashMap<PartitionKey, Cursor> = HashMap::new();
        let mut admitting = true;
        let limit = self.max_in_flight.max(1);

        loop {
            if !admitting && inflight.is_empty() {
                break;
            }
            self.health.set_state(
                self.partition,
                if inflight.is_empty() {
                    WorkerState::Reading
                } else {
                    WorkerState::Producing
                },
            );
            let can_admit = admitting && inflight.len() < limit;

            tokio::select! {
                biased;

                () = self.abort.cancelled() => {
                    return self.stopped(inflight.len());
                }

                Some(done) = inflight.next(), if !inflight.is_empty() => {
                    if let Err(exit) = self.complete(done, &mut cursors, inflight.len()).await {
                        return exit;
                    }
                }

                () = self.stop_admitting.cancelled(), if admitting => {
                    debug!(partition = self.partition, in_flight = inflight.len(), "stop admitting");
                    admitting = false;
                    queue.close();
                }

                received = queue.recv(), if can_admit => match received {
                    Some(event) => {
                        if let Err(exit) = self.admit(event, &mut cursors, &mut inflight).await {
                            return exit;
                        }
                    }
                    None => admitting = false,
                },
            }
        }

        self.health.stop(self.partition);
        debug!(partition = self.partition, "partition drained");
        WorkerExit::Drained
    }

    async fn admit(
        &self,
        event: SourceEvent,
        cursors: &mut HashMap<PartitionKey, Cursor>,
        inflight: &mut InFlight,
    ) -> Result<(), WorkerExit> {
        let key = event.partition_key();
        let position = event.stream_position;
        let global = event.global_position;

        let cursor = match cursors.get(&key) {
            Some(cursor) => *cursor,
            None => {
                let loaded = tokio::select! {
                    biased;
                    () = self.abort.cancelled() => return Err(self.stopped(inflight.len())),
                    loaded = self.checkpoints.get(&key) => loaded,
                };
                let checkpoint = loaded.map_err(|e| {
                    self.fault(format!("failed to load checkpoint for {key}: {e}"))
                })?;
                trace!(partition = self.partition, %key, ?checkpoint, "loaded checkpoint");
                Cursor {
                    checkpoint,
                    admitted: None,
                }
            }
        };

        if cursor.is_duplicate(position) {
            trace!(partition = self.partition, %key, %position, "dropping redelivered event");
            self.health.update(self.partition, |r| r.duplicates += 1);
            self.watermark.settle(global);
            cursors.insert(key, cursor);
            return Ok(());
        }
        cursors.insert(
            key.clone(),
            Cursor {
                admitted: Some(position),
                ..cursor
            },
        );

        self.health.set_state(self.partition, WorkerState::Transforming);
        let operation = self.transform.transform(&event).map_err(|e| self.fault(e.to_string()))?;

        let completion: BoxFuture<'static, Completion> = match operation {
            None => future::ready(Completion {
                key,
                position,
                global,
                outcome: Outcome::Skipped,
            })
            .boxed(),
            Some(operation) => {
                let producer = Arc::clone(&self.producer);
                let abort = self.abort.clone();
                async move {
                    let outcome = match producer.produce(&operation, &abort).await {
                        Ok(_) => Outcome::Produced,
                        Err(e) => Outcome::Failed(e),
                    };
                    Completion {
                        key,
                        position,
                        global,
                        outcome,
                    }
                }
                .boxed()
            }
        };
        inflight.push_back(completion);
        Ok(())
    }

    /// Records one completion. `behind` is the number of completions still
    /// queued after it, all of which are abandoned if this one stops the
    /// worker.
    async fn complete(
        &self,
        done: Completion,
        cursors: &mut HashMap<PartitionKey, Cursor>,
        behind: usize,
    ) -> Result<(), WorkerExit> {
        let Completion {
            key,
            position,
            global,
            outcome,
        } = done;

        match outcome {
            Outcome::Produced => self.health.update(self.partition, |r| r.produced += 1),
            Outcome::Skipped => self.health.update(self.partition, |r| r.skipped += 1),
            Outcome::Failed(ProduceError::Cancelled { .. }) => {
                return Err(self.stopped(behind + 1));
            }
            Outcome::Failed(e) => {
                return Err(self.fault(format!("produce failed for {key}@{position}: {e}")));
            }
        }

        self.health.set_state(self.partition, WorkerState::Checkpointing);
        let stored = tokio::select! {
            biased;
            () = self.abort.cancelled() => return Err(self.stopped(behind + 1)),
            stored = self.checkpoints.set(&key, position) => stored,
        };
        stored.map_err(|e| self.fault(format!("failed to store checkpoint for {key}: {e}")))?;

        if let Some(cursor) = cursors.get_mut(&key) {
            cursor.checkpoint = Some(position);
        }
        self.watermark.settle(global);
        trace!(partition = self.partition, %key, %position, "checkpointed");
        Ok(())
    }

    fn fault(&self, reason: String) -> WorkerExit {
        error!(partition = self.partition, %reason, "partition faulted");
        self.health.fault(self.partition, reason);
        WorkerExit::Faulted
    }

    fn stopped(&self, abandoned: usize) -> WorkerExit {
        debug!(partition = self.partition, abandoned, "partition stopped");
        self.health.stop(self.partition);
        WorkerExit::Stopped { abandoned }
    }
}
