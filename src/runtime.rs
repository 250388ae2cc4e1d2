//! Top-level entry point composing the journal, the aggregate manager,
//! the projection workers, and the join monitor into one runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::behavior::{Aggregate, Behavior};
use crate::clock::{Clock, SystemClock};
use crate::error::{AskJoinError, AskJoinResult, CommandError, CommandResult};
use crate::ids::{CommandId, Envelope, IdProvider, UuidProvider};
use crate::journal::{EventJournal, TagFilter};
use crate::manager::{AggregateManager, ManagerConfig};
use crate::memory::InMemoryJournal;
use crate::monitor::{EventsFilter, MonitorGuard, ProjectionMonitor};
use crate::projection::{
    Projection, ProjectionHandle, ProjectionStatus, RetryConfig, spawn_projection,
};

type ProjectionSpawn<E> = Box<
    dyn FnOnce(
            Arc<dyn EventJournal<E>>,
            Arc<ProjectionMonitor>,
            RetryConfig,
            watch::Receiver<bool>,
        ) -> ProjectionHandle
        + Send,
>;

/// Configures and assembles an [`AggregateRuntime`].
///
/// Projections must be registered here, before the runtime exists: their
/// workers subscribe from the start of the log, so every event, past and
/// future, reaches every registered view.
pub struct RuntimeBuilder<A: Aggregate> {
    behavior: Behavior<A>,
    journal: Arc<dyn EventJournal<A::Event>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    manager_config: ManagerConfig,
    retry: RetryConfig,
    projections: Vec<ProjectionSpawn<A::Event>>,
}

impl<A: Aggregate> RuntimeBuilder<A> {
    /// Start a builder over a behavior and journal.
    pub fn new(behavior: Behavior<A>, journal: Arc<dyn EventJournal<A::Event>>) -> Self {
        Self {
            behavior,
            journal,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidProvider),
            manager_config: ManagerConfig::default(),
            retry: RetryConfig::default(),
            projections: Vec::new(),
        }
    }

    /// Start a builder backed by a fresh [`InMemoryJournal`].
    pub fn in_memory(behavior: Behavior<A>) -> Self {
        Self::new(behavior, Arc::new(InMemoryJournal::new()))
    }

    /// Substitute the wall-clock source.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Substitute the event id source.
    pub fn id_provider(mut self, ids: impl IdProvider) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Tune the aggregate workers.
    pub fn manager_config(mut self, config: ManagerConfig) -> Self {
        self.manager_config = config;
        self
    }

    /// Tune the projection retry budget.
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register a projection, optionally narrowed to a tag filter.
    pub fn projection<P>(mut self, projection: P, filter: Option<TagFilter>) -> Self
    where
        P: Projection<A::Event>,
    {
        self.projections.push(Box::new(move |journal, monitor, retry, shutdown| {
            spawn_projection(projection, journal, filter, monitor, retry, shutdown)
        }));
        self
    }

    /// Spawn the projection workers and hand out the runtime.
    pub fn build(self) -> AggregateRuntime<A> {
        let monitor = Arc::new(ProjectionMonitor::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let projections: Vec<ProjectionHandle> = self
            .projections
            .into_iter()
            .map(|spawn| {
                spawn(
                    self.journal.clone(),
                    monitor.clone(),
                    self.retry.clone(),
                    shutdown_rx.clone(),
                )
            })
            .collect();

        let manager = AggregateManager::new(
            self.behavior,
            self.journal.clone(),
            self.clock,
            self.ids,
            self.manager_config,
        );

        AggregateRuntime {
            manager,
            journal: self.journal,
            monitor,
            projections: Arc::new(projections),
            shutdown: Arc::new(shutdown_tx),
        }
    }
}

/// The public surface of one aggregate kind: submit commands, query state,
/// and join writes with read-side arrival.
///
/// Cloning is cheap and shares all underlying workers.
pub struct AggregateRuntime<A: Aggregate> {
    manager: AggregateManager<A>,
    journal: Arc<dyn EventJournal<A::Event>>,
    monitor: Arc<ProjectionMonitor>,
    projections: Arc<Vec<ProjectionHandle>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<A: Aggregate> Clone for AggregateRuntime<A> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            journal: self.journal.clone(),
            monitor: self.monitor.clone(),
            projections: self.projections.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<A: Aggregate> AggregateRuntime<A> {
    /// Submit a command without waiting for its outcome.
    ///
    /// Returns the assigned command id for later correlation.
    pub async fn submit(
        &self,
        aggregate_id: &A::Id,
        command: A::Command,
    ) -> Result<CommandId, CommandError<A::Error>> {
        self.manager.tell(aggregate_id, command).await
    }

    /// Submit a command and wait up to `timeout` for the committed events.
    pub async fn ask(
        &self,
        aggregate_id: &A::Id,
        command: A::Command,
        timeout: Duration,
    ) -> CommandResult<A> {
        self.manager.ask(aggregate_id, command, timeout).await
    }

    /// Submit a command and wait until the named projection has applied
    /// the events it produced.
    ///
    /// On success the committed events are returned once each watched
    /// event has been confirmed by the projection. When the write commits
    /// but the read side does not confirm within `timeout` (or the
    /// projection stalls), the error still carries the committed events:
    /// the caller knows the write happened. A view name no projection
    /// reports under behaves the same way: the write goes through and the
    /// join times out.
    pub async fn ask_join(
        &self,
        aggregate_id: &A::Id,
        command: A::Command,
        view: &str,
        filter: EventsFilter,
        timeout: Duration,
    ) -> AskJoinResult<A> {
        let started = std::time::Instant::now();
        let envelope = Envelope::new(aggregate_id.clone(), command);

        // The entry must exist before the command does: the projection
        // could otherwise apply the events before anyone listens.
        let guard: MonitorGuard = self.monitor.clone().register(envelope.command_id, view);

        let events = match tokio::time::timeout(timeout, self.manager.execute(envelope)).await {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => return Err(AskJoinError::Command(err)),
            Err(_) => return Err(AskJoinError::Command(CommandError::Timeout)),
        };

        let watched = filter.watched(&events);
        let remaining = timeout.saturating_sub(started.elapsed());
        match guard.wait(watched, remaining).await {
            Ok(()) => Ok(events),
            Err(cause) => Err(AskJoinError::ProjectionJoin {
                view: view.to_owned(),
                events,
                cause,
            }),
        }
    }

    /// Current state of an aggregate, or `NotFound` when it is absent.
    pub async fn state(&self, aggregate_id: &A::Id) -> Result<A::State, CommandError<A::Error>> {
        self.manager.state(aggregate_id).await
    }

    /// Whether an aggregate with this id exists.
    pub async fn exists(&self, aggregate_id: &A::Id) -> Result<bool, CommandError<A::Error>> {
        self.manager.exists(aggregate_id).await
    }

    /// Drop the in-memory worker for an aggregate; see
    /// [`AggregateManager::passivate`].
    pub async fn passivate(&self, aggregate_id: &A::Id) {
        self.manager.passivate(aggregate_id).await;
    }

    /// Current status of a registered projection.
    pub fn projection_status(&self, view: &str) -> Option<ProjectionStatus> {
        self.projections
            .iter()
            .find(|p| p.name == view)
            .map(|p| *p.status.borrow())
    }

    /// The journal this runtime writes to.
    pub fn journal(&self) -> &Arc<dyn EventJournal<A::Event>> {
        &self.journal
    }

    /// Stop the projection workers and wait for them to exit.
    ///
    /// Aggregate workers are untouched; they passivate on their own idle
    /// timeout. Calling `shutdown` more than once is safe.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        for projection in self.projections.iter() {
            let task = projection.task.lock().await.take();
            if let Some(task) = task {
                if let Err(err) = task.await {
                    tracing::error!(projection = projection.name, error = %err, "projection task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::test_fixtures::*;

    const ASK: Duration = Duration::from_secs(5);

    fn create_cmd(price: u32) -> ProductCommand {
        ProductCommand::Create {
            name: "a".to_owned(),
            description: "d".to_owned(),
            price,
        }
    }

    #[tokio::test]
    async fn ask_and_state_roundtrip() {
        let runtime = RuntimeBuilder::in_memory(product_behavior()).build();
        let id = "p-1".to_owned();

        runtime.ask(&id, create_cmd(10), ASK).await.unwrap();
        assert_eq!(runtime.state(&id).await.unwrap().price, 10);
        assert!(runtime.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn ask_join_on_unknown_view_commits_then_times_out() {
        let runtime = RuntimeBuilder::in_memory(product_behavior()).build();
        let err = runtime
            .ask_join(
                &"p-1".to_owned(),
                create_cmd(10),
                "nonexistent",
                EventsFilter::All,
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();

        // The command is submitted regardless of the view name; only the
        // join fails, and it still reports the committed events.
        match err {
            AskJoinError::ProjectionJoin { view, events, cause } => {
                assert_eq!(view, "nonexistent");
                assert_eq!(events.len(), 1);
                assert_eq!(cause, crate::error::JoinCause::Timeout);
            }
            other => panic!("expected ProjectionJoin, got: {other}"),
        }
        assert!(runtime.exists(&"p-1".to_owned()).await.unwrap());
    }

    #[tokio::test]
    async fn projection_status_of_unknown_view_is_none() {
        let runtime = RuntimeBuilder::in_memory(product_behavior()).build();
        assert!(runtime.projection_status("nope").is_none());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let runtime = RuntimeBuilder::in_memory(product_behavior()).build();
        runtime.shutdown().await;
        runtime.shutdown().await;
    }
}
