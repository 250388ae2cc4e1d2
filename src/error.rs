//! Crate-level error types for command execution, journal access, and
//! read-side joins.

use std::fmt;

use crate::behavior::Aggregate;
use crate::event::RecordedEvent;

/// Events committed on behalf of one command.
pub type CommittedEvents<A> = Vec<RecordedEvent<<A as Aggregate>::Event>>;

/// Result of submitting a command to an aggregate.
pub type CommandResult<A> = Result<CommittedEvents<A>, CommandError<<A as Aggregate>::Error>>;

/// Result of a command submission joined with a projection.
pub type AskJoinResult<A> =
    Result<CommittedEvents<A>, AskJoinError<<A as Aggregate>::Error, <A as Aggregate>::Event>>;

/// Storage-level failure reported by a journal implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    /// An append did not continue the aggregate's sequence.
    ///
    /// Sequence numbers are assigned by the single writer, so a violation
    /// indicates a second writer or a broken rehydration. Fatal for the
    /// offending worker.
    #[error("out-of-order append for '{aggregate_id}': expected sequence {expected}, got {got}")]
    SequenceViolation {
        /// Textual aggregate id of the stream.
        aggregate_id: String,
        /// The sequence number the stream expected next.
        expected: u64,
        /// The sequence number that was offered.
        got: u64,
    },

    /// The backing store failed to persist or read events.
    #[error("journal storage failure: {0}")]
    Storage(String),
}

/// Error completing a command submission.
///
/// Generic over `E`, the domain rejection type declared by the aggregate's
/// behavior.
#[derive(Debug, thiserror::Error)]
pub enum CommandError<E: std::error::Error + Send + Sync + 'static> {
    /// The behavior examined the command and rejected it.
    ///
    /// No events were written and the aggregate state is unchanged.
    #[error(transparent)]
    Rejected(E),

    /// No behavior clause matches this command in the applicable phase.
    #[error("no behavior clause matches command {command} (aggregate {aggregate_id:?})")]
    InvalidCommand {
        /// Debug rendering of the unmatched command.
        command: String,
        /// Target aggregate id, when known at the point of failure.
        aggregate_id: Option<String>,
    },

    /// The command or query addressed an aggregate that does not exist.
    #[error("aggregate '{0}' does not exist")]
    NotFound(String),

    /// The journal failed while appending or replaying.
    ///
    /// The command was not applied; state is unchanged.
    #[error("journal failure: {0}")]
    Journal(#[from] JournalError),

    /// The caller's wait elapsed.
    ///
    /// The command itself is not cancelled: once queued it is still
    /// attempted exactly once.
    #[error("timed out waiting for the command to complete")]
    Timeout,

    /// The aggregate's worker task is no longer running.
    #[error("aggregate worker is no longer running")]
    WorkerGone,
}

/// Why a projection join did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinCause {
    /// The join wait elapsed before every watched event was applied.
    #[error("timed out waiting for the projection to apply the events")]
    Timeout,

    /// The projection exhausted its retries and stopped consuming.
    #[error("projection is stalled")]
    Stalled,
}

/// Error completing a joined submission ([`ask_join`]).
///
/// The `ProjectionJoin` variant carries the committed events: the write
/// side succeeded even though the read side was not confirmed in time.
///
/// [`ask_join`]: crate::runtime::AggregateRuntime::ask_join
#[derive(Debug, thiserror::Error)]
pub enum AskJoinError<R, E>
where
    R: std::error::Error + Send + Sync + 'static,
    E: fmt::Debug,
{
    /// The write side failed; nothing was committed.
    #[error(transparent)]
    Command(#[from] CommandError<R>),

    /// The events were committed but the projection did not confirm them.
    #[error("write committed but projection '{view}' did not confirm it: {cause}")]
    ProjectionJoin {
        /// The projection the join was waiting on.
        view: String,
        /// The events that were committed by the write side.
        events: Vec<RecordedEvent<E>>,
        /// Why the join failed.
        cause: JoinCause,
    },
}

/// Failure inside a projection handler.
///
/// Treated as retryable by the projection runtime until the retry budget
/// is exhausted, at which point the projection stalls.
#[derive(Debug, thiserror::Error)]
#[error("projection handler failed: {0}")]
pub struct ProjectionError(Box<dyn std::error::Error + Send + Sync>);

impl ProjectionError {
    /// Wrap any error as a retryable projection failure.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

impl From<crate::view::ViewError> for ProjectionError {
    fn from(err: crate::view::ViewError) -> Self {
        Self::new(err)
    }
}
