//! Embedded CQRS/event-sourcing runtime.
//!
//! `foldstream` provides the write-and-read-side machinery for
//! event-sourced applications: a phased behavior DSL, per-aggregate
//! single-writer command execution over an append-only journal, and
//! projection workers whose progress can be joined with write
//! acknowledgements. Storage is pluggable; an in-memory journal ships as
//! the default and test backend.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Behavior`] | Phased handler set: commands to events, events to state |
//! | [`AggregateRuntime`] | Entry point: `submit` / `ask` / `ask_join` / `state` / `exists` |
//! | [`AggregateManager`] | Per-id single-writer workers behind bounded mailboxes |
//! | [`EventJournal`] | Append-only per-aggregate log with a subscription feed |
//! | [`Projection`] | Read-model consumer driven by its own worker task |
//! | [`ViewRepository`] | Single-item read-side storage the projections write into |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use foldstream::{Aggregate, Behavior, CommandOutcome, RuntimeBuilder};
//!
//! // 1. Declare the aggregate's types.
//! struct Counter;
//!
//! #[derive(Debug)]
//! enum CounterCommand {
//!     Open,
//!     Add(u64),
//! }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! enum CounterEvent {
//!     Opened,
//!     Added { amount: u64 },
//! }
//!
//! #[derive(Debug, thiserror::Error)]
//! enum CounterError {}
//!
//! impl Aggregate for Counter {
//!     const NAME: &'static str = "counter";
//!     type Id = String;
//!     type Command = CounterCommand;
//!     type Event = CounterEvent;
//!     type State = u64;
//!     type Error = CounterError;
//! }
//!
//! // 2. Describe its behavior in two phases.
//! fn behavior() -> Behavior<Counter> {
//!     Behavior::builder()
//!         .when_constructing(|create| {
//!             create
//!                 .on_command(
//!                     |cmd| matches!(cmd, CounterCommand::Open),
//!                     |_| CommandOutcome::One(CounterEvent::Opened),
//!                 )
//!                 .on_event(|ev| matches!(ev, CounterEvent::Opened), |_| 0);
//!         })
//!         .when_updating(|update| {
//!             update
//!                 .on_command(
//!                     |cmd| matches!(cmd, CounterCommand::Add(_)),
//!                     |_, cmd| match cmd {
//!                         CounterCommand::Add(amount) => {
//!                             CommandOutcome::One(CounterEvent::Added { amount: *amount })
//!                         }
//!                         _ => unreachable!(),
//!                     },
//!                 )
//!                 .on_event(
//!                     |ev| matches!(ev, CounterEvent::Added { .. }),
//!                     |total, ev| match ev {
//!                         CounterEvent::Added { amount } => total + amount,
//!                         _ => unreachable!(),
//!                     },
//!                 );
//!         })
//!         .build()
//! }
//!
//! // 3. Build a runtime and send commands.
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = RuntimeBuilder::in_memory(behavior()).build();
//! let id = "c-1".to_owned();
//!
//! runtime.ask(&id, CounterCommand::Open, Duration::from_secs(5)).await?;
//! runtime.ask(&id, CounterCommand::Add(3), Duration::from_secs(5)).await?;
//!
//! assert_eq!(runtime.state(&id).await?, 3);
//! # Ok(())
//! # }
//! ```

mod behavior;
pub use behavior::{
    Aggregate, Behavior, BehaviorBuilder, CommandOutcome, ConstructionPhase, Defined, Pending,
    UpdatePhase,
};
mod clock;
mod error;
mod event;
mod ids;
mod instance;
mod journal;
mod manager;
mod memory;
mod monitor;
mod projection;
mod runtime;
mod view;

pub use clock::{Clock, SystemClock};
pub use error::{
    AskJoinError, AskJoinResult, CommandError, CommandResult, CommittedEvents, JoinCause,
    JournalError, ProjectionError,
};
pub use event::{EventMetadata, RecordedEvent};
pub use ids::{AggregateId, CommandId, Envelope, EventId, IdProvider, UuidProvider};
pub use instance::Lifecycle;
pub use journal::{EventJournal, TagFilter};
pub use manager::{AggregateManager, ManagerConfig};
pub use memory::InMemoryJournal;
pub use monitor::EventsFilter;
pub use projection::{Projection, ProjectionStatus, RetryConfig};
pub use runtime::{AggregateRuntime, RuntimeBuilder};
pub use view::{InMemoryViewRepository, ViewError, ViewRepository};
