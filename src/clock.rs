//! Wall-clock abstraction for event timestamps.

use chrono::{DateTime, Utc};

/// Source of wall-clock timestamps for event metadata.
///
/// An explicit handle passed into the runtime at construction, so tests can
/// substitute a fixed clock and no code reaches for ambient time.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Default [`Clock`] reading the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// A clock pinned to a single instant.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }
}
