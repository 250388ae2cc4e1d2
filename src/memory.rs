//! In-process reference implementation of the event journal.
//!
//! Events live in per-aggregate vectors plus one interleaved log that
//! preserves global append order for subscribers. New appends are fanned
//! out over a broadcast channel; a subscription snapshots the log and
//! chains the live receiver under the same lock, so the history/live
//! boundary neither loses nor duplicates events.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::JournalError;
use crate::event::RecordedEvent;
use crate::journal::{EventJournal, TagFilter};

/// Broadcast buffer size. A subscriber that falls further behind than this
/// sees a lag warning and skips ahead, which at-least-once delivery allows.
const FEED_CAPACITY: usize = 1024;

struct Log<E> {
    streams: HashMap<String, Vec<RecordedEvent<E>>>,
    order: Vec<RecordedEvent<E>>,
}

/// Volatile [`EventJournal`] used by tests and as the default backend.
pub struct InMemoryJournal<E> {
    log: Mutex<Log<E>>,
    feed: broadcast::Sender<RecordedEvent<E>>,
}

impl<E: Clone + Send + Sync + 'static> InMemoryJournal<E> {
    /// Create an empty journal.
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            log: Mutex::new(Log {
                streams: HashMap::new(),
                order: Vec::new(),
            }),
            feed,
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Default for InMemoryJournal<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventJournal<E> for InMemoryJournal<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(
        &self,
        aggregate_id: &str,
        events: Vec<RecordedEvent<E>>,
    ) -> Result<(), JournalError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut log = self.log.lock().expect("journal mutex poisoned");

        let last = log
            .streams
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(0, |event| event.sequence);
        let mut expected = last + 1;
        for event in &events {
            if event.sequence != expected {
                return Err(JournalError::SequenceViolation {
                    aggregate_id: aggregate_id.to_owned(),
                    expected,
                    got: event.sequence,
                });
            }
            expected += 1;
        }

        log.streams
            .entry(aggregate_id.to_owned())
            .or_default()
            .extend(events.iter().cloned());
        log.order.extend(events.iter().cloned());
        // Publish while still holding the lock so a concurrent subscribe
        // cannot slip between the snapshot and the live feed.
        for event in events {
            let _ = self.feed.send(event);
        }
        Ok(())
    }

    async fn load(
        &self,
        aggregate_id: &str,
    ) -> BoxStream<'static, Result<RecordedEvent<E>, JournalError>> {
        let events = {
            let log = self.log.lock().expect("journal mutex poisoned");
            log.streams.get(aggregate_id).cloned().unwrap_or_default()
        };
        futures::stream::iter(events.into_iter().map(Ok)).boxed()
    }

    async fn subscribe(&self, filter: Option<TagFilter>) -> BoxStream<'static, RecordedEvent<E>> {
        let (snapshot, receiver) = {
            let log = self.log.lock().expect("journal mutex poisoned");
            (log.order.clone(), self.feed.subscribe())
        };
        let live = BroadcastStream::new(receiver).filter_map(|received| {
            futures::future::ready(match received {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind the event feed");
                    None
                }
            })
        });
        let all = futures::stream::iter(snapshot).chain(live);
        match filter {
            Some(filter) => all
                .filter(move |event| futures::future::ready(filter.matches(&event.metadata)))
                .boxed(),
            None => all.boxed(),
        }
    }
}
