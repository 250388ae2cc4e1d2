//! The append-only event journal the runtime writes to and reads from.
//!
//! The core owns no storage: it talks to any implementation of
//! [`EventJournal`]. The contract it relies on is narrow: per-id append
//! order is preserved on replay and on the live feed, an acknowledged
//! append is never lost, and duplicate delivery on the feed is permitted
//! (projections are idempotent by event id).

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::JournalError;
use crate::event::{EventMetadata, RecordedEvent};

/// Selects events whose metadata carries at least one of the wanted tags.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: BTreeSet<String>,
}

impl TagFilter {
    /// Match events tagged with any of the given tags.
    pub fn any_of<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether an event with this metadata passes the filter.
    pub fn matches(&self, metadata: &EventMetadata) -> bool {
        self.tags.is_empty() || metadata.tags.iter().any(|tag| self.tags.contains(tag))
    }
}

/// Append-only per-aggregate event log with a live subscription feed.
#[async_trait]
pub trait EventJournal<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Atomically append events to one aggregate's log.
    ///
    /// Implementations must reject sequences that do not directly continue
    /// the stream with [`JournalError::SequenceViolation`]. Once this
    /// returns `Ok`, the events are durable and will appear on every
    /// subscription feed in append order.
    async fn append(
        &self,
        aggregate_id: &str,
        events: Vec<RecordedEvent<E>>,
    ) -> Result<(), JournalError>;

    /// Replay one aggregate's log in append order.
    ///
    /// An unknown id yields an empty stream, not an error: new aggregates
    /// start with an empty history. Storage failures surface as `Err`
    /// items on the stream.
    async fn load(
        &self,
        aggregate_id: &str,
    ) -> BoxStream<'static, Result<RecordedEvent<E>, JournalError>>;

    /// Subscribe to the journal's feed, optionally narrowed by tag.
    ///
    /// Delivery is at-least-once and starts from the beginning of the log;
    /// per-aggregate append order is preserved.
    async fn subscribe(&self, filter: Option<TagFilter>) -> BoxStream<'static, RecordedEvent<E>>;
}
