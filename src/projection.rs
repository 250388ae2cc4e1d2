//! Read-side projection workers.
//!
//! Each registered projection runs on its own task: it subscribes to the
//! journal feed, applies every event through the projection's handler, and
//! reports each applied event to the join monitor. Failures are retried
//! with bounded exponential backoff; a projection that exhausts its budget
//! is marked *stalled* and stops consuming rather than silently advancing
//! past an unapplied event. Stalls are isolated: they never block writes
//! or other projections.
//!
//! Delivery is at-least-once, so handlers must be idempotent with respect
//! to event id (or a domain-unique key); the runtime does not deduplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;

use crate::error::ProjectionError;
use crate::event::RecordedEvent;
use crate::journal::{EventJournal, TagFilter};
use crate::monitor::ProjectionMonitor;

/// A read-side consumer of committed events.
#[async_trait]
pub trait Projection<E>: Send + Sync + 'static {
    /// Name of the view this projection maintains; the key used by
    /// read-side joins.
    const NAME: &'static str;

    /// Apply one event to the view.
    ///
    /// Must be idempotent per event id: the feed may deliver duplicates.
    /// An `Err` is retried with backoff before the projection stalls.
    async fn handle(&self, event: &RecordedEvent<E>) -> Result<(), ProjectionError>;
}

/// Retry budget for a failing projection handler.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first failure before the projection stalls.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Where a projection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionStatus {
    /// Consuming normally; `cursor` counts applied events.
    Running {
        /// Number of events applied so far.
        cursor: u64,
    },
    /// Retries exhausted; the worker stopped consuming.
    Stalled {
        /// Number of events applied before the stall.
        cursor: u64,
    },
}

impl ProjectionStatus {
    /// Whether the projection has stopped consuming.
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Stalled { .. })
    }
}

/// Handle the runtime keeps per spawned projection.
pub(crate) struct ProjectionHandle {
    pub(crate) name: &'static str,
    pub(crate) status: watch::Receiver<ProjectionStatus>,
    pub(crate) task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Spawn the worker task for one projection.
pub(crate) fn spawn_projection<E, P>(
    projection: P,
    journal: Arc<dyn EventJournal<E>>,
    filter: Option<TagFilter>,
    monitor: Arc<ProjectionMonitor>,
    retry: RetryConfig,
    mut shutdown: watch::Receiver<bool>,
) -> ProjectionHandle
where
    E: Send + Sync + 'static,
    P: Projection<E>,
{
    let (status_tx, status_rx) = watch::channel(ProjectionStatus::Running { cursor: 0 });

    let task = tokio::spawn(async move {
        let mut events = journal.subscribe(filter).await;
        let mut cursor = 0u64;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = events.next() => {
                    let Some(event) = next else { break };
                    match apply_with_retry(&projection, &event, &retry).await {
                        Ok(()) => {
                            cursor += 1;
                            status_tx.send_replace(ProjectionStatus::Running { cursor });
                            monitor.event_applied(
                                P::NAME,
                                event.metadata.command_id,
                                event.metadata.event_id,
                            );
                        }
                        Err(err) => {
                            tracing::error!(
                                projection = P::NAME,
                                event_id = %event.metadata.event_id,
                                error = %err,
                                "projection stalled, no longer consuming"
                            );
                            status_tx.send_replace(ProjectionStatus::Stalled { cursor });
                            monitor.projection_stalled(P::NAME);
                            break;
                        }
                    }
                }
            }
        }
    });

    ProjectionHandle {
        name: P::NAME,
        status: status_rx,
        task: tokio::sync::Mutex::new(Some(task)),
    }
}

async fn apply_with_retry<E, P>(
    projection: &P,
    event: &RecordedEvent<E>,
    retry: &RetryConfig,
) -> Result<(), ProjectionError>
where
    E: Send + Sync + 'static,
    P: Projection<E>,
{
    let mut attempt = 0u32;
    let mut delay = retry.base_delay;
    loop {
        match projection.handle(event).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < retry.max_retries => {
                attempt += 1;
                tracing::warn!(
                    projection = P::NAME,
                    attempt,
                    error = %err,
                    "projection handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(retry.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}
