//! Recorded events and the metadata stamped on them at emission time.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::behavior::Aggregate;
use crate::ids::{CommandId, EventId};

/// Metadata attached to every event when it is recorded.
///
/// Commands know nothing of event ids or timestamps; all of this is stamped
/// by the single writer at emission time. The `command_id` ties each event
/// back to the submission that produced it, which is what the read-side
/// join keys on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Textual form of the producing aggregate's id.
    pub aggregate_id: String,
    /// The command this event was produced by.
    pub command_id: CommandId,
    /// Globally unique id of this event.
    pub event_id: EventId,
    /// Wall-clock instant at which the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Routing tags for subscription filtering. `BTreeSet` keeps the
    /// serialized form deterministic.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// An immutable fact recorded in the journal.
///
/// `sequence` is 1-based and strictly increasing per aggregate id, with no
/// gaps; it is assigned by the aggregate's single writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "E: Serialize", deserialize = "E: DeserializeOwned"))]
pub struct RecordedEvent<E> {
    /// Position of this event within its aggregate's log.
    pub sequence: u64,
    /// The domain event.
    pub payload: E,
    /// Emission-time metadata.
    pub metadata: EventMetadata,
}

/// The tag set stamped on every event of aggregate kind `A`: the kind name
/// plus any extra tags the aggregate declares.
pub(crate) fn event_tags<A: Aggregate>() -> BTreeSet<String> {
    std::iter::once(A::NAME)
        .chain(A::TAGS.iter().copied())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum NoteEvent {
        Written { body: String },
    }

    fn sample_event() -> RecordedEvent<NoteEvent> {
        RecordedEvent {
            sequence: 3,
            payload: NoteEvent::Written {
                body: "hello".to_owned(),
            },
            metadata: EventMetadata {
                aggregate_id: "note-1".to_owned(),
                command_id: CommandId::new(),
                event_id: EventId::new(),
                timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
                tags: ["note".to_owned()].into(),
            },
        }
    }

    #[test]
    fn recorded_event_roundtrips_losslessly() {
        let event = sample_event();
        let json = serde_json::to_string(&event).expect("serialization should succeed");
        let back: RecordedEvent<NoteEvent> =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, event);
    }

    #[test]
    fn empty_tags_are_omitted_from_json() {
        let mut event = sample_event();
        event.metadata.tags.clear();
        let json = serde_json::to_string(&event).expect("serialization should succeed");
        assert!(
            !json.contains("tags"),
            "empty tag set should be absent, got: {json}"
        );
    }
}
