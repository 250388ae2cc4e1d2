//! Coupling between write acknowledgement and read-side arrival.
//!
//! The monitor is a small hub shared by the runtime and the projection
//! workers. A joined submission registers an entry *before* the command is
//! submitted; from that moment every post-projection notification for the
//! command is buffered, so events applied between submission and the
//! caller's wait are never missed. Once the write side reports which event
//! ids it committed, the entry completes as soon as all watched ids have
//! been seen.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::JoinCause;
use crate::event::RecordedEvent;
use crate::ids::{CommandId, EventId};

/// Narrows which committed events a join waits on.
///
/// The filter never narrows what is committed or returned to the caller,
/// only what must be seen on the read side before the join completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventsFilter {
    /// Wait for every committed event.
    #[default]
    All,
    /// Wait only for the first `n` committed events.
    Limit(usize),
}

impl EventsFilter {
    /// The event ids to wait on, out of the committed sequence.
    pub(crate) fn watched<E>(&self, events: &[RecordedEvent<E>]) -> HashSet<EventId> {
        let ids = events.iter().map(|event| event.metadata.event_id);
        match self {
            Self::All => ids.collect(),
            Self::Limit(n) => ids.take(*n).collect(),
        }
    }
}

struct Entry {
    seen: HashSet<EventId>,
    expected: Option<HashSet<EventId>>,
    waker: Option<oneshot::Sender<Result<(), JoinCause>>>,
}

impl Entry {
    fn satisfied(&self) -> bool {
        self.expected
            .as_ref()
            .is_some_and(|expected| expected.is_subset(&self.seen))
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<(CommandId, String), Entry>,
    stalled_views: HashSet<String>,
}

/// Hub where projection workers report applied events and joined
/// submissions wait for them.
#[derive(Default)]
pub(crate) struct ProjectionMonitor {
    inner: Mutex<Inner>,
}

impl ProjectionMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open an entry for a command about to be submitted.
    ///
    /// Must be called before the submission so no notification can fire
    /// ahead of the entry. The guard removes the entry on drop.
    pub(crate) fn register(self: Arc<Self>, command_id: CommandId, view: &str) -> MonitorGuard {
        let key = (command_id, view.to_owned());
        {
            let mut inner = self.inner.lock().expect("monitor mutex poisoned");
            inner.entries.insert(
                key.clone(),
                Entry {
                    seen: HashSet::new(),
                    expected: None,
                    waker: None,
                },
            );
        }
        MonitorGuard { monitor: self, key }
    }

    /// Called by a projection worker after an event was applied.
    pub(crate) fn event_applied(&self, view: &str, command_id: CommandId, event_id: EventId) {
        let mut inner = self.inner.lock().expect("monitor mutex poisoned");
        let key = (command_id, view.to_owned());
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.seen.insert(event_id);
            if entry.satisfied()
                && let Some(waker) = entry.waker.take()
            {
                let _ = waker.send(Ok(()));
            }
        }
    }

    /// Called by a projection worker that exhausted its retries.
    ///
    /// Fails every waiting entry on the view and makes future waits on it
    /// fail fast.
    pub(crate) fn projection_stalled(&self, view: &str) {
        let mut inner = self.inner.lock().expect("monitor mutex poisoned");
        inner.stalled_views.insert(view.to_owned());
        for ((_, entry_view), entry) in inner.entries.iter_mut() {
            if entry_view == view
                && let Some(waker) = entry.waker.take()
            {
                let _ = waker.send(Err(JoinCause::Stalled));
            }
        }
    }
}

/// Live registration of one joined submission. Removes its entry on drop,
/// so early-error paths never leak monitor state.
pub(crate) struct MonitorGuard {
    monitor: Arc<ProjectionMonitor>,
    key: (CommandId, String),
}

impl MonitorGuard {
    /// Wait until every watched event id has been applied to the view.
    pub(crate) async fn wait(
        &self,
        watched: HashSet<EventId>,
        timeout: Duration,
    ) -> Result<(), JoinCause> {
        let receiver = {
            let mut inner = self.monitor.inner.lock().expect("monitor mutex poisoned");
            if inner.stalled_views.contains(&self.key.1) {
                return Err(JoinCause::Stalled);
            }
            let entry = inner
                .entries
                .get_mut(&self.key)
                .expect("monitor entry removed while its guard is alive");
            entry.expected = Some(watched);
            if entry.satisfied() {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            entry.waker = Some(tx);
            rx
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            // The waker can only vanish without firing if the hub is torn
            // down mid-wait; report it as a timeout.
            Ok(Err(_)) => Err(JoinCause::Timeout),
            Err(_) => Err(JoinCause::Timeout),
        }
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.monitor.inner.lock() {
            inner.entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use chrono::Utc;

    const WAIT: Duration = Duration::from_secs(1);
    const SHORT: Duration = Duration::from_millis(50);

    fn recorded(event_id: EventId) -> RecordedEvent<u32> {
        RecordedEvent {
            sequence: 1,
            payload: 0,
            metadata: EventMetadata {
                aggregate_id: "a-1".to_owned(),
                command_id: CommandId::new(),
                event_id,
                timestamp: Utc::now(),
                tags: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn completes_when_all_watched_events_applied() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        let event_id = EventId::new();

        let guard = monitor.clone().register(command_id, "view");
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                monitor.event_applied("view", command_id, event_id);
            })
        };

        guard.wait([event_id].into(), WAIT).await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn notifications_before_wait_are_buffered() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        let event_id = EventId::new();

        let guard = monitor.clone().register(command_id, "view");
        // Applied before the caller knows which events to watch.
        monitor.event_applied("view", command_id, event_id);

        guard.wait([event_id].into(), WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn empty_watch_set_completes_immediately() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let guard = monitor.clone().register(CommandId::new(), "view");
        guard.wait(HashSet::new(), WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_when_events_never_arrive() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let guard = monitor.clone().register(CommandId::new(), "view");
        let err = guard.wait([EventId::new()].into(), SHORT).await.unwrap_err();
        assert_eq!(err, JoinCause::Timeout);
    }

    #[tokio::test]
    async fn notifications_for_other_commands_are_ignored() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        let guard = monitor.clone().register(command_id, "view");

        monitor.event_applied("view", CommandId::new(), EventId::new());

        let err = guard.wait([EventId::new()].into(), SHORT).await.unwrap_err();
        assert_eq!(err, JoinCause::Timeout);
    }

    #[tokio::test]
    async fn stall_fails_current_waiters() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        let guard = monitor.clone().register(command_id, "view");

        let stall = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                monitor.projection_stalled("view");
            })
        };

        let err = guard.wait([EventId::new()].into(), WAIT).await.unwrap_err();
        assert_eq!(err, JoinCause::Stalled);
        stall.await.unwrap();
    }

    #[tokio::test]
    async fn stall_fails_future_waits_fast() {
        let monitor = Arc::new(ProjectionMonitor::new());
        monitor.projection_stalled("view");

        let guard = monitor.clone().register(CommandId::new(), "view");
        let err = guard.wait([EventId::new()].into(), WAIT).await.unwrap_err();
        assert_eq!(err, JoinCause::Stalled);
    }

    #[tokio::test]
    async fn stalled_view_does_not_fail_other_views() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        let event_id = EventId::new();
        monitor.projection_stalled("broken-view");

        let guard = monitor.clone().register(command_id, "healthy-view");
        monitor.event_applied("healthy-view", command_id, event_id);
        guard.wait([event_id].into(), WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn guard_drop_removes_the_entry() {
        let monitor = Arc::new(ProjectionMonitor::new());
        let command_id = CommandId::new();
        {
            let _guard = monitor.clone().register(command_id, "view");
        }
        let inner = monitor.inner.lock().unwrap();
        assert!(inner.entries.is_empty());
    }

    #[test]
    fn limit_filter_watches_a_prefix() {
        let events: Vec<RecordedEvent<u32>> =
            (0..3).map(|_| recorded(EventId::new())).collect();

        let all = EventsFilter::All.watched(&events);
        assert_eq!(all.len(), 3);

        let first_two = EventsFilter::Limit(2).watched(&events);
        assert_eq!(first_two.len(), 2);
        assert!(first_two.contains(&events[0].metadata.event_id));
        assert!(first_two.contains(&events[1].metadata.event_id));
        assert!(!first_two.contains(&events[2].metadata.event_id));

        let none = EventsFilter::Limit(0).watched(&events);
        assert!(none.is_empty());
    }
}
