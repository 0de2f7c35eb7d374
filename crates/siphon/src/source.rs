//! Source log reader contract.
//!
//! A [`Source`] hands out a [`Subscription`]: an ordered stream of events at
//! or after a requested global position. Events of one stream must arrive in
//! non-decreasing position order. Redelivery is allowed; the pipeline
//! filters duplicates against checkpoints.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use siphon_types::{GlobalPosition, SourceEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Failure while reading the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The connection dropped. The pipeline resubscribes.
    #[error("source disconnected: {0}")]
    Disconnected(String),

    /// The source cannot continue (bad data, auth failure). The pipeline stops.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

/// Reads the ordered event log.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Subscribes from `from` (inclusive). `None` means the start of the log.
    async fn subscribe(&self, from: Option<GlobalPosition>) -> Result<Subscription, SourceError>;
}

/// Handle to an active subscription.
///
/// Dropping the handle or calling [`cancel`](Self::cancel) ends delivery and
/// signals the token handed to push-style producers.
pub struct Subscription {
    events: BoxStream<'static, Result<SourceEvent, SourceError>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Wraps a pull-style stream.
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Result<SourceEvent, SourceError>> + Send + 'static,
    {
        Self {
            events: events.boxed(),
            cancel: CancellationToken::new(),
        }
    }

    /// Wraps a push-style channel. The producer should stop when `cancel`
    /// fires or the send fails.
    pub fn from_receiver(
        receiver: mpsc::Receiver<Result<SourceEvent, SourceError>>,
        cancel: CancellationToken,
    ) -> Self {
        let events = futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Self {
            events: events.boxed(),
            cancel,
        }
    }

    /// Next event, or `None` once the source is exhausted.
    pub async fn next(&mut self) -> Option<Result<SourceEvent, SourceError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.events.next().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = Result<SourceEvent, SourceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A finite in-memory log.
///
/// Delivers every event whose global position is at or after the requested
/// start, in the order given, then ends.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Vec<SourceEvent>,
}

impl MemorySource {
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[SourceEvent] {
        &self.events
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn subscribe(&self, from: Option<GlobalPosition>) -> Result<Subscription, SourceError> {
        let from = from.unwrap_or(GlobalPosition::START);
        let events: Vec<_> = self
            .events
            .iter()
            .filter(|e| e.global_position >= from)
            .cloned()
            .map(Ok)
            .collect();
        Ok(Subscription::new(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use siphon_types::{Metadata, Position, StreamName};
    use uuid::Uuid;

    fn event(global: u64) -> SourceEvent {
        SourceEvent {
            id: Uuid::new_v4(),
            event_type: "Test".to_string(),
            stream: StreamName::from("A"),
            stream_position: Position::new(global),
            global_position: GlobalPosition::new(global),
            payload: Bytes::new(),
            content_type: "application/json".to_string(),
            metadata: Metadata::new(),
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_source_honours_start_position() {
        let source = MemorySource::new((1..=5).map(event).collect());
        let mut sub = source.subscribe(Some(GlobalPosition::new(3))).await.unwrap();

        let mut seen = Vec::new();
        while let Some(item) = sub.next().await {
            seen.push(item.unwrap().global_position.as_u64());
        }
        assert_eq!(seen, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn cancelled_subscription_yields_nothing() {
        let source = MemorySource::new((1..=3).map(event).collect());
        let mut sub = source.subscribe(None).await.unwrap();
        sub.cancel();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn push_subscription_observes_drop() {
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let sub = Subscription::from_receiver(rx, token.clone());

        tx.send(Ok(event(1))).await.unwrap();
        drop(sub);
        assert!(token.is_cancelled());
    }
}
