//! One aggregate's in-memory materialisation: lifecycle, fold, and the
//! per-stream sequence assertion.

use std::sync::Arc;

use crate::behavior::{Aggregate, Behavior};
use crate::event::RecordedEvent;

/// Where an aggregate is in its life.
///
/// State only becomes `Live` by folding a creation event; it never appears
/// out of thin air.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle<S> {
    /// No creation event has been recorded.
    Absent,
    /// The aggregate exists and holds derived state.
    Live(S),
}

// Manual impl: the derive would demand `S: Default`, which derived states
// have no reason to implement.
impl<S> Default for Lifecycle<S> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<S> Lifecycle<S> {
    /// Whether the aggregate exists.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// The state, when live.
    pub fn state(&self) -> Option<&S> {
        match self {
            Self::Live(state) => Some(state),
            Self::Absent => None,
        }
    }
}

/// Holds the current state of one aggregate and folds events into it.
pub(crate) struct AggregateInstance<A: Aggregate> {
    behavior: Arc<Behavior<A>>,
    lifecycle: Lifecycle<A::State>,
    last_sequence: u64,
}

impl<A: Aggregate> AggregateInstance<A> {
    pub(crate) fn new(behavior: Arc<Behavior<A>>) -> Self {
        Self {
            behavior,
            lifecycle: Lifecycle::Absent,
            last_sequence: 0,
        }
    }

    pub(crate) fn state(&self) -> Option<&A::State> {
        self.lifecycle.state()
    }

    pub(crate) fn exists(&self) -> bool {
        self.lifecycle.is_live()
    }

    /// Sequence number the next recorded event must carry.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    /// Fold one recorded event into the state.
    ///
    /// # Panics
    ///
    /// Panics on a non-monotonic sequence or when the first event of a
    /// stream matches no construction event clause. Both are programming
    /// errors and crash the owning worker rather than corrupt state.
    pub(crate) fn apply(&mut self, event: &RecordedEvent<A::Event>) {
        assert_eq!(
            event.sequence,
            self.last_sequence + 1,
            "event for '{}' applied out of order",
            event.metadata.aggregate_id,
        );
        self.lifecycle = match std::mem::take(&mut self.lifecycle) {
            Lifecycle::Absent => {
                let state = self.behavior.initial_state(&event.payload).unwrap_or_else(|| {
                    panic!(
                        "first event of '{}' matches no construction event clause: {:?}",
                        event.metadata.aggregate_id, event.payload,
                    )
                });
                Lifecycle::Live(state)
            }
            Lifecycle::Live(state) => {
                Lifecycle::Live(self.behavior.next_state(state, &event.payload))
            }
        };
        self.last_sequence = event.sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::test_fixtures::*;
    use crate::event::EventMetadata;
    use crate::ids::{CommandId, EventId};
    use chrono::Utc;

    fn recorded(sequence: u64, payload: ProductEvent) -> RecordedEvent<ProductEvent> {
        RecordedEvent {
            sequence,
            payload,
            metadata: EventMetadata {
                aggregate_id: "p-1".to_owned(),
                command_id: CommandId::new(),
                event_id: EventId::new(),
                timestamp: Utc::now(),
                tags: Default::default(),
            },
        }
    }

    fn created() -> ProductEvent {
        ProductEvent::Created {
            name: "a".to_owned(),
            description: "d".to_owned(),
            price: 10,
        }
    }

    #[test]
    fn starts_absent() {
        let instance = AggregateInstance::<Product>::new(Arc::new(product_behavior()));
        assert!(!instance.exists());
        assert!(instance.state().is_none());
        assert_eq!(instance.next_sequence(), 1);
    }

    #[test]
    fn creation_event_brings_aggregate_live() {
        let mut instance = AggregateInstance::<Product>::new(Arc::new(product_behavior()));
        instance.apply(&recorded(1, created()));
        assert!(instance.exists());
        assert_eq!(instance.state().unwrap().price, 10);
        assert_eq!(instance.next_sequence(), 2);
    }

    #[test]
    fn update_events_fold_in_order() {
        let mut instance = AggregateInstance::<Product>::new(Arc::new(product_behavior()));
        instance.apply(&recorded(1, created()));
        instance.apply(&recorded(
            2,
            ProductEvent::NameChanged {
                name: "b".to_owned(),
            },
        ));
        instance.apply(&recorded(3, ProductEvent::PriceChanged { price: 30 }));

        let state = instance.state().unwrap();
        assert_eq!(state.name, "b");
        assert_eq!(state.price, 30);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn skipped_sequence_panics() {
        let mut instance = AggregateInstance::<Product>::new(Arc::new(product_behavior()));
        instance.apply(&recorded(1, created()));
        instance.apply(&recorded(3, ProductEvent::PriceChanged { price: 30 }));
    }

    #[test]
    #[should_panic(expected = "no construction event clause")]
    fn update_event_as_first_event_panics() {
        let mut instance = AggregateInstance::<Product>::new(Arc::new(product_behavior()));
        instance.apply(&recorded(
            1,
            ProductEvent::NameChanged {
                name: "b".to_owned(),
            },
        ));
    }
}
