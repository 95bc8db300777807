//! Log-watch state machine.
//!
//! The node reports its progress only through timestamped log lines. A
//! [`WatchSession`] tails the node log from the moment it opens, ignores
//! anything stamped at or before its start time, and turns the milestones it
//! sees into a single bounded outcome. Two protocols share the tailing loop:
//! the startup watch and the bootstrap watch.

mod bootstrap;
mod line;
mod session;
mod startup;
mod tailer;

use std::time::Duration;

use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub use bootstrap::{BootstrapFailure, BootstrapOutcome, BootstrapSuccess};
pub use line::{
    API_STARTED, BOOTSTRAP_BEGUN, BOOTSTRAP_DOWNLOADING, BOOTSTRAP_EXTRACTING, BOOTSTRAP_FAILED,
    NODE_RESTARTING, REPOSITORY_FAILURE, is_fresh, line_timestamp,
};
pub use session::{LogMark, WatchRegistry, WatchSession};
pub use startup::{StartupFailure, StartupOutcome, StartupWatch};
pub use tailer::LogTailer;

pub(crate) const WATCH_TARGET: &str = "warden::watch";

/// Wall clock in the zone the node stamps its log lines with.
///
/// The local offset is captured once, before any worker thread exists,
/// because it cannot be queried reliably from a multi-threaded process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    offset: UtcOffset,
}

impl LocalClock {
    /// Captures the host's current UTC offset, falling back to UTC.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    /// A clock pinned to `offset`.
    #[must_use]
    pub const fn fixed(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Offset applied to the current instant.
    #[must_use]
    pub const fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Current local time, truncated to whole seconds like log stamps.
    #[must_use]
    pub fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        let local = PrimitiveDateTime::new(now.date(), now.time());
        local.replace_nanosecond(0).unwrap_or(local)
    }
}

/// Bounds for the startup watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupTimings {
    /// Pause between log polls.
    pub poll_interval: Duration,
    /// How long to wait for the log file to appear.
    pub file_wait: Duration,
    /// Overall bound on tailing.
    pub overall: Duration,
    /// Pause between control API polls when no log file appears.
    pub api_poll_interval: Duration,
    /// Overall bound on control API polling.
    pub api_poll_window: Duration,
}

impl Default for StartupTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            file_wait: Duration::from_secs(60),
            overall: Duration::from_secs(20 * 60),
            api_poll_interval: Duration::from_secs(20),
            api_poll_window: Duration::from_secs(20 * 60),
        }
    }
}

/// Bounds for the bootstrap watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapTimings {
    /// Pause between log polls.
    pub poll_interval: Duration,
    /// How long to wait for the log file to appear.
    pub file_wait: Duration,
    /// How long after the session opens a begun marker may arrive.
    pub begin_window: Duration,
    /// Quiet period after a restart marker that counts as success.
    pub restart_grace: Duration,
    /// Hard cap on the whole session.
    pub overall: Duration,
}

impl Default for BootstrapTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            file_wait: Duration::from_secs(60),
            begin_window: Duration::from_secs(60),
            restart_grace: Duration::from_secs(120),
            overall: Duration::from_secs(60 * 60),
        }
    }
}
