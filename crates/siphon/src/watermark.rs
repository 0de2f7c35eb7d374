//! Subscription low watermark.
//!
//! The coordinator tracks every global position it dispatches, and the
//! owning worker settles it once the event is checkpointed, skipped, or
//! dropped as a redelivery. The watermark is the highest settled position
//! below every position still pending. Everything at or below it is durable
//! in some key's checkpoint, so the next run can subscribe from there
//! instead of re-reading the whole log.
//!
//! Events that never settle (a faulted partition, work abandoned at
//! shutdown) hold the watermark back, so they are read again on restart.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use siphon_types::{GlobalPosition, PartitionKey};

const WATERMARK_KEY_PREFIX: &str = "$subscription-";

/// Checkpoint key under which a subscription's watermark is stored.
pub fn watermark_key(subscription_id: &str) -> PartitionKey {
    PartitionKey::new(format!("{WATERMARK_KEY_PREFIX}{subscription_id}"))
}

#[derive(Debug, Default)]
struct State {
    pending: BTreeSet<GlobalPosition>,
    settled: BTreeSet<GlobalPosition>,
    mark: Option<GlobalPosition>,
    persisted: Option<GlobalPosition>,
}

impl State {
    fn advance(&mut self) {
        let ready = match self.pending.first().copied() {
            Some(floor) => {
                let above = self.settled.split_off(&floor);
                std::mem::replace(&mut self.settled, above)
            }
            None => std::mem::take(&mut self.settled),
        };
        if let Some(highest) = ready.last() {
            self.mark = self.mark.max(Some(*highest));
        }
    }
}

/// Shared watermark handle for one run.
#[derive(Debug, Clone, Default)]
pub(crate) struct Watermark {
    state: Arc<Mutex<State>>,
}

impl Watermark {
    /// Starts from a previously persisted watermark.
    pub(crate) fn resume(persisted: Option<GlobalPosition>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                mark: persisted,
                persisted,
                ..State::default()
            })),
        }
    }

    /// Registers a position before it is handed to a partition queue.
    pub(crate) fn track(&self, position: GlobalPosition) {
        self.state.lock().pending.insert(position);
    }

    pub(crate) fn settle(&self, position: GlobalPosition) {
        let mut state = self.state.lock();
        state.pending.remove(&position);
        state.settled.insert(position);
        state.advance();
    }

    pub(crate) fn current(&self) -> Option<GlobalPosition> {
        self.state.lock().mark
    }

    /// The watermark if it moved past the last persisted value.
    pub(crate) fn unpersisted(&self) -> Option<GlobalPosition> {
        let state = self.state.lock();
        state
            .mark
            .filter(|mark| state.persisted.is_none_or(|persisted| *mark > persisted))
    }

    pub(crate) fn mark_persisted(&self, position: GlobalPosition) {
        let mut state = self.state.lock();
        state.persisted = state.persisted.max(Some(position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(position: u64) -> GlobalPosition {
        GlobalPosition::new(position)
    }

    #[test]
    fn holds_below_the_lowest_pending_position() {
        let watermark = Watermark::default();
        for p in 1..=4 {
            watermark.track(g(p));
        }

        watermark.settle(g(2));
        watermark.settle(g(3));
        assert_eq!(watermark.current(), None);

        watermark.settle(g(1));
        assert_eq!(watermark.current(), Some(g(3)));

        watermark.settle(g(4));
        assert_eq!(watermark.current(), Some(g(4)));
    }

    #[test]
    fn unsettled_position_blocks_later_ones() {
        let watermark = Watermark::default();
        for p in [10, 20, 30] {
            watermark.track(g(p));
        }
        watermark.settle(g(10));
        watermark.settle(g(30));

        assert_eq!(watermark.current(), Some(g(10)));
    }

    #[test]
    fn never_moves_backwards() {
        let watermark = Watermark::resume(Some(g(50)));
        watermark.track(g(50));
        watermark.settle(g(50));
        watermark.track(g(51));
        watermark.settle(g(51));
        assert_eq!(watermark.current(), Some(g(51)));

        let restarted = Watermark::resume(Some(g(50)));
        restarted.track(g(7));
        restarted.settle(g(7));
        assert_eq!(restarted.current(), Some(g(50)));
    }

    #[test]
    fn unpersisted_reports_only_progress() {
        let watermark = Watermark::resume(Some(g(5)));
        assert_eq!(watermark.unpersisted(), None);

        watermark.track(g(6));
        watermark.settle(g(6));
        assert_eq!(watermark.unpersisted(), Some(g(6)));

        watermark.mark_persisted(g(6));
        assert_eq!(watermark.unpersisted(), None);
    }

    #[test]
    fn key_is_namespaced_by_subscription() {
        assert_eq!(watermark_key("orders").as_str(), "$subscription-orders");
    }
}
