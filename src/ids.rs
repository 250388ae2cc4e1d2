//! Identifiers for aggregates, commands, and events, plus the routing envelope.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::behavior::Aggregate;

/// Identity of a single aggregate instance.
///
/// Each aggregate kind carries its own id type; the runtime only needs the
/// id to be comparable, hashable, and to have a stable textual form. The
/// `Display` output is used as the journal stream key and is stamped into
/// event metadata, so it must be unique per instance.
pub trait AggregateId:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> AggregateId for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// Unique identifier of a command submission.
///
/// Every event produced by a command carries that command's id, which is
/// what lets the read side report back which writes it has applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Generate a fresh random command id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh random event id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of event ids, injected into the runtime at construction.
///
/// Implementations must produce globally unique ids; no ordering is
/// required. The default [`UuidProvider`] uses random UUIDs.
pub trait IdProvider: Send + Sync + 'static {
    /// Produce the id for the next event to be recorded.
    fn next_event_id(&self) -> EventId;
}

/// Default [`IdProvider`] backed by UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn next_event_id(&self) -> EventId {
        EventId::new()
    }
}

/// A command addressed to one aggregate instance.
///
/// Bundling the target id with the command keeps routing independent of
/// the command type: the manager never inspects the command to find its
/// destination.
#[derive(Debug)]
pub struct Envelope<A: Aggregate> {
    /// The aggregate instance the command is addressed to.
    pub aggregate_id: A::Id,
    /// Identity of this submission; stamped on every produced event.
    pub command_id: CommandId,
    /// The domain command itself.
    pub command: A::Command,
}

impl<A: Aggregate> Envelope<A> {
    /// Wrap a command for the given aggregate, assigning a fresh command id.
    pub fn new(aggregate_id: A::Id, command: A::Command) -> Self {
        Self {
            aggregate_id,
            command_id: CommandId::new(),
            command,
        }
    }

    /// Use a caller-supplied command id instead of an assigned one.
    pub fn with_command_id(mut self, command_id: CommandId) -> Self {
        self.command_id = command_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_are_unique() {
        let a = CommandId::new();
        let b = CommandId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn uuid_provider_yields_distinct_ids() {
        let provider = UuidProvider;
        assert_ne!(provider.next_event_id(), provider.next_event_id());
    }

    #[test]
    fn command_id_serde_roundtrip() {
        let id = CommandId::new();
        let json = serde_json::to_string(&id).expect("serialization should succeed");
        let back: CommandId = serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, id);
    }

    #[test]
    fn event_id_display_matches_serialized_form() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).expect("serialization should succeed");
        assert_eq!(json.trim_matches('"'), id.to_string());
    }
}
