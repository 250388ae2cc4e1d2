//! Per-aggregate single-writer command execution.
//!
//! The manager keeps a registry of *workers*, one per live aggregate id.
//! Each worker is a task that owns the aggregate's state exclusively and
//! processes messages from a bounded mailbox strictly one at a time, so
//! commands for one id are serialized in submission order while different
//! ids proceed in parallel. Workers rehydrate lazily by replaying the
//! journal on first contact and evict themselves after an idle period;
//! both are invisible to callers because state is a function of the log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::Instrument;

use crate::behavior::{Aggregate, Behavior};
use crate::clock::Clock;
use crate::error::{CommandError, CommandResult, JournalError};
use crate::event::{EventMetadata, RecordedEvent, event_tags};
use crate::ids::{CommandId, Envelope, IdProvider};
use crate::instance::AggregateInstance;
use crate::journal::EventJournal;

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Mailbox depth per worker; submissions beyond it apply backpressure.
    pub mailbox_capacity: usize,
    /// How long a worker waits for a message before passivating itself.
    pub idle_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Messages sent from the manager to a worker. Each carries a `oneshot`
/// reply channel; a dropped receiver means the caller stopped waiting and
/// the result is discarded.
enum WorkerMessage<A: Aggregate> {
    Execute {
        command: A::Command,
        command_id: CommandId,
        reply: oneshot::Sender<CommandResult<A>>,
    },
    Query {
        reply: oneshot::Sender<Result<Option<A::State>, JournalError>>,
    },
    Stop,
}

struct WorkerHandle<A: Aggregate> {
    sender: mpsc::Sender<WorkerMessage<A>>,
}

// Manual `Clone`: `A` itself carries no `Clone` obligation, only the
// sender is duplicated.
impl<A: Aggregate> Clone for WorkerHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> WorkerHandle<A> {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Routes commands to per-id workers and enforces the single-writer rule.
///
/// Cloning is cheap and shares the registry, journal, and behavior.
pub struct AggregateManager<A: Aggregate> {
    behavior: Arc<Behavior<A>>,
    journal: Arc<dyn EventJournal<A::Event>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    config: ManagerConfig,
    workers: Arc<RwLock<HashMap<A::Id, WorkerHandle<A>>>>,
}

impl<A: Aggregate> Clone for AggregateManager<A> {
    fn clone(&self) -> Self {
        Self {
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
            config: self.config.clone(),
            workers: self.workers.clone(),
        }
    }
}

impl<A: Aggregate> AggregateManager<A> {
    /// Create a manager over a behavior and journal.
    pub fn new(
        behavior: Behavior<A>,
        journal: Arc<dyn EventJournal<A::Event>>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            behavior: Arc::new(behavior),
            journal,
            clock,
            ids,
            config,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Execute a command and wait for the committed events.
    pub async fn execute(&self, envelope: Envelope<A>) -> CommandResult<A> {
        let Envelope {
            aggregate_id,
            command_id,
            command,
        } = envelope;
        let (tx, rx) = oneshot::channel();
        self.send(
            &aggregate_id,
            WorkerMessage::Execute {
                command,
                command_id,
                reply: tx,
            },
        )
        .await?;
        rx.await.map_err(|_| CommandError::WorkerGone)?
    }

    /// Execute a command, waiting at most `timeout` for the result.
    ///
    /// The timeout unblocks the caller only: a command that reached the
    /// mailbox is still attempted exactly once.
    pub async fn ask(
        &self,
        aggregate_id: &A::Id,
        command: A::Command,
        timeout: Duration,
    ) -> CommandResult<A> {
        let envelope = Envelope::new(aggregate_id.clone(), command);
        match tokio::time::timeout(timeout, self.execute(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout),
        }
    }

    /// Submit a command without waiting for its result.
    ///
    /// Returns the assigned command id so callers can correlate the
    /// eventual events.
    pub async fn tell(
        &self,
        aggregate_id: &A::Id,
        command: A::Command,
    ) -> Result<CommandId, CommandError<A::Error>> {
        let command_id = CommandId::new();
        let (tx, _) = oneshot::channel();
        self.send(
            aggregate_id,
            WorkerMessage::Execute {
                command,
                command_id,
                reply: tx,
            },
        )
        .await?;
        Ok(command_id)
    }

    /// Current state of an aggregate, or `NotFound` when it is absent.
    pub async fn state(&self, aggregate_id: &A::Id) -> Result<A::State, CommandError<A::Error>> {
        match self.query(aggregate_id).await? {
            Some(state) => Ok(state),
            None => Err(CommandError::NotFound(aggregate_id.to_string())),
        }
    }

    /// Whether an aggregate with this id exists.
    pub async fn exists(&self, aggregate_id: &A::Id) -> Result<bool, CommandError<A::Error>> {
        Ok(self.query(aggregate_id).await?.is_some())
    }

    /// Drop the in-memory worker for an aggregate.
    ///
    /// Messages already queued are processed first. The next contact
    /// respawns the worker, which rebuilds its state from the journal.
    pub async fn passivate(&self, aggregate_id: &A::Id) {
        let handle = self.workers.write().await.remove(aggregate_id);
        if let Some(handle) = handle {
            let _ = handle.sender.send(WorkerMessage::Stop).await;
        }
    }

    async fn query(
        &self,
        aggregate_id: &A::Id,
    ) -> Result<Option<A::State>, CommandError<A::Error>> {
        let (tx, rx) = oneshot::channel();
        self.send(aggregate_id, WorkerMessage::Query { reply: tx }).await?;
        let state = rx.await.map_err(|_| CommandError::WorkerGone)??;
        Ok(state)
    }

    /// Deliver a message to the id's worker, spawning or respawning it as
    /// needed. One retry covers the race where an idle worker shuts down
    /// between lookup and send.
    async fn send(
        &self,
        aggregate_id: &A::Id,
        message: WorkerMessage<A>,
    ) -> Result<(), CommandError<A::Error>> {
        let mut message = message;
        for _ in 0..2 {
            let handle = self.worker(aggregate_id).await;
            match handle.sender.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    message = returned;
                    self.workers.write().await.remove(aggregate_id);
                }
            }
        }
        Err(CommandError::WorkerGone)
    }

    async fn worker(&self, aggregate_id: &A::Id) -> WorkerHandle<A> {
        // Fast path: a live worker is already registered.
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(aggregate_id)
                && handle.is_alive()
            {
                return handle.clone();
            }
        }

        // Slow path: evict any dead handle and spawn under the write lock
        // so concurrent callers cannot race a second worker into existence.
        let mut workers = self.workers.write().await;
        if let Some(handle) = workers.get(aggregate_id)
            && handle.is_alive()
        {
            return handle.clone();
        }
        workers.remove(aggregate_id);

        tracing::debug!(
            aggregate = A::NAME,
            aggregate_id = %aggregate_id,
            "spawning aggregate worker"
        );
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let worker = Worker::<A> {
            aggregate_id: aggregate_id.clone(),
            behavior: self.behavior.clone(),
            instance: AggregateInstance::new(self.behavior.clone()),
            hydrated: false,
            journal: self.journal.clone(),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
        };
        let idle_timeout = self.config.idle_timeout;
        tokio::spawn(worker.run(rx, idle_timeout));

        let handle = WorkerHandle { sender: tx };
        workers.insert(aggregate_id.clone(), handle.clone());
        handle
    }
}

/// The single writer for one aggregate id. Owns the instance exclusively;
/// nothing outside the task ever touches the state.
struct Worker<A: Aggregate> {
    aggregate_id: A::Id,
    behavior: Arc<Behavior<A>>,
    instance: AggregateInstance<A>,
    hydrated: bool,
    journal: Arc<dyn EventJournal<A::Event>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
}

impl<A: Aggregate> Worker<A> {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage<A>>, idle_timeout: Duration) {
        loop {
            match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(WorkerMessage::Execute {
                    command,
                    command_id,
                    reply,
                })) => {
                    let span = tracing::info_span!(
                        "execute",
                        aggregate = A::NAME,
                        aggregate_id = %self.aggregate_id,
                        command_id = %command_id,
                    );
                    let result = self.execute(command, command_id).instrument(span).await;
                    let _ = reply.send(result);
                }
                Ok(Some(WorkerMessage::Query { reply })) => {
                    let result = self.query().await;
                    let _ = reply.send(result);
                }
                Ok(Some(WorkerMessage::Stop)) | Ok(None) => break,
                Err(_elapsed) => {
                    tracing::info!(
                        aggregate = A::NAME,
                        aggregate_id = %self.aggregate_id,
                        "worker idle, passivating"
                    );
                    break;
                }
            }
        }
    }

    async fn execute(&mut self, command: A::Command, command_id: CommandId) -> CommandResult<A> {
        self.rehydrate().await.map_err(CommandError::Journal)?;

        let outcome = match self.instance.state() {
            None => match self.behavior.construct(&command) {
                Some(outcome) => outcome,
                None if self.behavior.accepts_update(&command) => {
                    return Err(CommandError::NotFound(self.aggregate_id.to_string()));
                }
                None => return Err(self.invalid(&command)),
            },
            Some(state) => match self.behavior.update(state, &command) {
                Some(outcome) => outcome,
                None => return Err(self.invalid(&command)),
            },
        };

        let events = outcome.into_events().await.map_err(CommandError::Rejected)?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut sequence = self.instance.next_sequence();
        let mut recorded = Vec::with_capacity(events.len());
        for payload in events {
            recorded.push(RecordedEvent {
                sequence,
                payload,
                metadata: EventMetadata {
                    aggregate_id: self.aggregate_id.to_string(),
                    command_id,
                    event_id: self.ids.next_event_id(),
                    timestamp: self.clock.now(),
                    tags: event_tags::<A>(),
                },
            });
            sequence += 1;
        }

        self.journal
            .append(&self.aggregate_id.to_string(), recorded.clone())
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "journal append failed");
                CommandError::Journal(err)
            })?;

        for event in &recorded {
            self.instance.apply(event);
        }
        tracing::info!(count = recorded.len(), "events committed");
        Ok(recorded)
    }

    async fn query(&mut self) -> Result<Option<A::State>, JournalError> {
        self.rehydrate().await?;
        Ok(self.instance.state().cloned())
    }

    /// Replay the aggregate's log once, on first contact.
    async fn rehydrate(&mut self) -> Result<(), JournalError> {
        if self.hydrated {
            return Ok(());
        }
        let mut events = self.journal.load(&self.aggregate_id.to_string()).await;
        while let Some(event) = events.next().await {
            self.instance.apply(&event?);
        }
        self.hydrated = true;
        Ok(())
    }

    fn invalid(&self, command: &A::Command) -> CommandError<A::Error> {
        CommandError::InvalidCommand {
            command: format!("{command:?}"),
            aggregate_id: Some(self.aggregate_id.to_string()),
        }
    }
}
