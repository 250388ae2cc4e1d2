//! Behavior specification DSL: how commands become events and how events
//! fold into state.
//!
//! A [`Behavior`] is assembled in two named phases. The *construction*
//! phase says how an aggregate comes into existence; the *update* phase
//! says how a live aggregate evolves. Each phase holds two ordered clause
//! lists: command clauses (`Command -> CommandOutcome`) and event clauses
//! (`Event -> State`). Clauses are scanned in declaration order and the
//! first matching guard wins, so dispatch is deterministic across runs.
//!
//! The builder is threaded through both phases and tracks completion with
//! phantom type-state markers: [`build`](BehaviorBuilder::build) only
//! exists once [`when_constructing`](BehaviorBuilder::when_constructing)
//! and [`when_updating`](BehaviorBuilder::when_updating) have both been
//! supplied, so a half-specified behavior cannot reach the runtime.
//!
//! ```
//! use foldstream::{Aggregate, Behavior, CommandOutcome};
//!
//! struct Light;
//!
//! #[derive(Debug)]
//! enum LightCommand {
//!     Install,
//!     Toggle,
//! }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! enum LightEvent {
//!     Installed,
//!     Toggled,
//! }
//!
//! #[derive(Debug, thiserror::Error)]
//! enum LightError {}
//!
//! impl Aggregate for Light {
//!     const NAME: &'static str = "light";
//!     type Id = String;
//!     type Command = LightCommand;
//!     type Event = LightEvent;
//!     type State = bool;
//!     type Error = LightError;
//! }
//!
//! let behavior: Behavior<Light> = Behavior::builder()
//!     .when_constructing(|create| {
//!         create
//!             .on_command(
//!                 |cmd| matches!(cmd, LightCommand::Install),
//!                 |_| CommandOutcome::One(LightEvent::Installed),
//!             )
//!             .on_event(|ev| matches!(ev, LightEvent::Installed), |_| false);
//!     })
//!     .when_updating(|update| {
//!         update
//!             .on_command(
//!                 |cmd| matches!(cmd, LightCommand::Toggle),
//!                 |_, _| CommandOutcome::One(LightEvent::Toggled),
//!             )
//!             .on_event(|ev| matches!(ev, LightEvent::Toggled), |on, _| !on);
//!     })
//!     .build();
//!
//! assert!(behavior.accepts_construction(&LightCommand::Install));
//! ```

use std::fmt;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ids::AggregateId;

/// Declares the types of one aggregate kind.
///
/// The implementing type is only a marker; the actual state lives in
/// [`Aggregate::State`] and is derived by folding events through the
/// kind's [`Behavior`].
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// Identifies this aggregate kind (e.g. `"product"`). Stamped into
    /// event tags and used in worker telemetry.
    const NAME: &'static str;

    /// Extra routing tags stamped on every event of this kind.
    const TAGS: &'static [&'static str] = &[];

    /// Identity of one instance of this kind.
    type Id: AggregateId;

    /// The set of commands this aggregate accepts.
    type Command: fmt::Debug + Send + 'static;

    /// The set of events this aggregate records and folds.
    type Event: fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The state derived from the event log.
    type State: Clone + Send + Sync + 'static;

    /// Command rejection type.
    type Error: std::error::Error + Send + Sync + 'static;
}

/// What a command clause decided.
///
/// The engine treats every variant uniformly by normalising to a future of
/// an event sequence; the variants exist so call sites stay explicit about
/// what they produce.
pub enum CommandOutcome<A: Aggregate> {
    /// Accept, recording a single event.
    One(A::Event),
    /// Accept, recording a sequence of events.
    Many(Vec<A::Event>),
    /// Defer to an asynchronous decision.
    Async(BoxFuture<'static, Result<Vec<A::Event>, A::Error>>),
    /// Reject the command; nothing is recorded.
    Reject(A::Error),
}

impl<A: Aggregate> CommandOutcome<A> {
    /// Wrap a future decision without spelling out the pinning.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Vec<A::Event>, A::Error>> + Send + 'static,
    {
        Self::Async(Box::pin(fut))
    }

    /// Normalise to a future resolving to the accepted event sequence.
    pub(crate) fn into_events(self) -> BoxFuture<'static, Result<Vec<A::Event>, A::Error>> {
        match self {
            Self::One(event) => Box::pin(async move { Ok(vec![event]) }),
            Self::Many(events) => Box::pin(async move { Ok(events) }),
            Self::Async(fut) => fut,
            Self::Reject(err) => Box::pin(async move { Err(err) }),
        }
    }
}

type CommandGuard<A> = Box<dyn Fn(&<A as Aggregate>::Command) -> bool + Send + Sync>;
type EventGuard<A> = Box<dyn Fn(&<A as Aggregate>::Event) -> bool + Send + Sync>;
type ConstructHandler<A> =
    Box<dyn Fn(&<A as Aggregate>::Command) -> CommandOutcome<A> + Send + Sync>;
type UpdateHandler<A> = Box<
    dyn Fn(&<A as Aggregate>::State, &<A as Aggregate>::Command) -> CommandOutcome<A>
        + Send
        + Sync,
>;
type ConstructApplier<A> =
    Box<dyn Fn(&<A as Aggregate>::Event) -> <A as Aggregate>::State + Send + Sync>;
type UpdateApplier<A> = Box<
    dyn Fn(&<A as Aggregate>::State, &<A as Aggregate>::Event) -> <A as Aggregate>::State
        + Send
        + Sync,
>;

/// Clause list for bringing an aggregate into existence.
pub struct ConstructionPhase<A: Aggregate> {
    commands: Vec<(CommandGuard<A>, ConstructHandler<A>)>,
    events: Vec<(EventGuard<A>, ConstructApplier<A>)>,
}

impl<A: Aggregate> ConstructionPhase<A> {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Add a creation command clause. The handler runs only when `guard`
    /// accepts the command and no earlier clause matched.
    pub fn on_command(
        &mut self,
        guard: impl Fn(&A::Command) -> bool + Send + Sync + 'static,
        handler: impl Fn(&A::Command) -> CommandOutcome<A> + Send + Sync + 'static,
    ) -> &mut Self {
        self.commands.push((Box::new(guard), Box::new(handler)));
        self
    }

    /// Add a creation event clause producing the initial state.
    pub fn on_event(
        &mut self,
        guard: impl Fn(&A::Event) -> bool + Send + Sync + 'static,
        apply: impl Fn(&A::Event) -> A::State + Send + Sync + 'static,
    ) -> &mut Self {
        self.events.push((Box::new(guard), Box::new(apply)));
        self
    }
}

/// Clause list for evolving a live aggregate.
pub struct UpdatePhase<A: Aggregate> {
    commands: Vec<(CommandGuard<A>, UpdateHandler<A>)>,
    events: Vec<(EventGuard<A>, UpdateApplier<A>)>,
}

impl<A: Aggregate> UpdatePhase<A> {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Add an update command clause. The handler sees the current state.
    pub fn on_command(
        &mut self,
        guard: impl Fn(&A::Command) -> bool + Send + Sync + 'static,
        handler: impl Fn(&A::State, &A::Command) -> CommandOutcome<A> + Send + Sync + 'static,
    ) -> &mut Self {
        self.commands.push((Box::new(guard), Box::new(handler)));
        self
    }

    /// Add an update event clause producing the next state.
    pub fn on_event(
        &mut self,
        guard: impl Fn(&A::Event) -> bool + Send + Sync + 'static,
        apply: impl Fn(&A::State, &A::Event) -> A::State + Send + Sync + 'static,
    ) -> &mut Self {
        self.events.push((Box::new(guard), Box::new(apply)));
        self
    }
}

/// Type-state marker: a phase that has not been supplied yet.
pub struct Pending;

/// Type-state marker: a phase that has been supplied.
pub struct Defined;

/// Builder threaded through the two behavior phases.
///
/// The `C` and `U` parameters track which phases have been supplied;
/// [`build`](BehaviorBuilder::build) is only available once both are
/// [`Defined`].
pub struct BehaviorBuilder<A: Aggregate, C = Pending, U = Pending> {
    construction: ConstructionPhase<A>,
    update: UpdatePhase<A>,
    _phases: PhantomData<(C, U)>,
}

impl<A: Aggregate, C, U> BehaviorBuilder<A, C, U> {
    fn transition<C2, U2>(self) -> BehaviorBuilder<A, C2, U2> {
        BehaviorBuilder {
            construction: self.construction,
            update: self.update,
            _phases: PhantomData,
        }
    }
}

impl<A: Aggregate, U> BehaviorBuilder<A, Pending, U> {
    /// Supply the construction phase.
    pub fn when_constructing(
        mut self,
        configure: impl FnOnce(&mut ConstructionPhase<A>),
    ) -> BehaviorBuilder<A, Defined, U> {
        configure(&mut self.construction);
        self.transition()
    }
}

impl<A: Aggregate, C> BehaviorBuilder<A, C, Pending> {
    /// Supply the update phase.
    pub fn when_updating(
        mut self,
        configure: impl FnOnce(&mut UpdatePhase<A>),
    ) -> BehaviorBuilder<A, C, Defined> {
        configure(&mut self.update);
        self.transition()
    }
}

impl<A: Aggregate> BehaviorBuilder<A, Defined, Defined> {
    /// Finalise the behavior. Only reachable once both phases exist.
    pub fn build(self) -> Behavior<A> {
        Behavior {
            construction: self.construction,
            update: self.update,
        }
    }
}

/// The complete, immutable handler set of one aggregate kind.
pub struct Behavior<A: Aggregate> {
    construction: ConstructionPhase<A>,
    update: UpdatePhase<A>,
}

impl<A: Aggregate> Behavior<A> {
    /// Start assembling a behavior.
    pub fn builder() -> BehaviorBuilder<A> {
        BehaviorBuilder {
            construction: ConstructionPhase::new(),
            update: UpdatePhase::new(),
            _phases: PhantomData,
        }
    }

    /// Run the first matching construction command clause, if any.
    pub fn construct(&self, command: &A::Command) -> Option<CommandOutcome<A>> {
        self.construction
            .commands
            .iter()
            .find(|(guard, _)| guard(command))
            .map(|(_, handler)| handler(command))
    }

    /// Run the first matching update command clause, if any.
    pub fn update(&self, state: &A::State, command: &A::Command) -> Option<CommandOutcome<A>> {
        self.update
            .commands
            .iter()
            .find(|(guard, _)| guard(command))
            .map(|(_, handler)| handler(state, command))
    }

    /// Whether any construction clause accepts this command.
    pub fn accepts_construction(&self, command: &A::Command) -> bool {
        self.construction.commands.iter().any(|(guard, _)| guard(command))
    }

    /// Whether any update clause accepts this command.
    pub fn accepts_update(&self, command: &A::Command) -> bool {
        self.update.commands.iter().any(|(guard, _)| guard(command))
    }

    /// Fold a creation event into the initial state.
    ///
    /// Returns `None` when no construction event clause matches; the
    /// caller treats that as a programming error, since a creation command
    /// clause must be paired with a clause for the event it emits.
    pub fn initial_state(&self, event: &A::Event) -> Option<A::State> {
        self.construction
            .events
            .iter()
            .find(|(guard, _)| guard(event))
            .map(|(_, apply)| apply(event))
    }

    /// Fold an update event into the next state.
    ///
    /// Events are facts: when no clause matches, the state is returned
    /// unchanged so replay never fails on an unknown event.
    pub fn next_state(&self, state: A::State, event: &A::Event) -> A::State {
        match self.update.events.iter().find(|(guard, _)| guard(event)) {
            Some((_, apply)) => apply(&state, event),
            None => state,
        }
    }
}
