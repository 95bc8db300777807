//! Bootstrap watch: follows a node rebuilding its repository from a
//! bootstrap archive.

use std::time::Instant;

use tracing::{debug, info};

use super::line::{
    API_STARTED, BOOTSTRAP_BEGUN, BOOTSTRAP_DOWNLOADING, BOOTSTRAP_EXTRACTING, BOOTSTRAP_FAILED,
    NODE_RESTARTING, find_marker,
};
use super::session::{FileWait, LineProtocol, Resolution, Verdict, WatchSession};
use super::{BootstrapTimings, WATCH_TARGET};

/// How a bootstrap completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapSuccess {
    /// The node announced its control API after bootstrapping.
    ApiStarted,
    /// The node restarted and stayed quiet about failures for the grace period.
    RestartGrace,
}

/// Why a bootstrap failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapFailure {
    /// The node log never appeared.
    LogFileMissing,
    /// No sign of a bootstrap within the begin window.
    NeverBegan,
    /// The node logged a failure marker.
    Marker(&'static str),
}

/// How a bootstrap watch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The node logged a success marker.
    Completed(BootstrapSuccess),
    /// The bootstrap failed or never started.
    Failed(BootstrapFailure),
    /// The hard cap elapsed while the bootstrap was still running.
    TimedOut,
    /// A newer session for the same log took over.
    Superseded,
}

impl BootstrapOutcome {
    /// Whether the bootstrap counts as successful.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingBegin,
    Active,
    Restarting { grace_until: Instant },
}

struct BootstrapProtocol {
    phase: Phase,
    timings: BootstrapTimings,
    begin_deadline: Instant,
    hard_deadline: Instant,
}

impl BootstrapProtocol {
    fn new(opened_at: Instant, timings: BootstrapTimings) -> Self {
        Self {
            phase: Phase::AwaitingBegin,
            timings,
            begin_deadline: opened_at + timings.begin_window,
            hard_deadline: opened_at + timings.overall,
        }
    }
}

fn progress_for(text: &str) -> Verdict<BootstrapOutcome> {
    if text.contains(BOOTSTRAP_DOWNLOADING) {
        Verdict::Progress(50)
    } else if text.contains(BOOTSTRAP_EXTRACTING) {
        Verdict::Progress(75)
    } else {
        Verdict::Ignore
    }
}

impl LineProtocol for BootstrapProtocol {
    type Outcome = BootstrapOutcome;

    fn on_line(&mut self, text: &str, now: Instant) -> Verdict<BootstrapOutcome> {
        if let Some(marker) = find_marker(text, BOOTSTRAP_FAILED) {
            return Verdict::Resolve(BootstrapOutcome::Failed(BootstrapFailure::Marker(marker)));
        }
        match self.phase {
            Phase::AwaitingBegin => {
                if find_marker(text, BOOTSTRAP_BEGUN).is_none() {
                    return Verdict::Ignore;
                }
                debug!(target: WATCH_TARGET, "bootstrap begun");
                self.phase = Phase::Active;
                progress_for(text)
            }
            Phase::Active | Phase::Restarting { .. } => {
                if text.contains(API_STARTED) {
                    return Verdict::Resolve(BootstrapOutcome::Completed(BootstrapSuccess::ApiStarted));
                }
                if text.contains(NODE_RESTARTING) && self.phase == Phase::Active {
                    debug!(target: WATCH_TARGET, "node restarting; grace timer armed");
                    self.phase = Phase::Restarting {
                        grace_until: now + self.timings.restart_grace,
                    };
                    return Verdict::Ignore;
                }
                progress_for(text)
            }
        }
    }

    fn on_tick(&mut self, now: Instant) -> Option<BootstrapOutcome> {
        match self.phase {
            Phase::AwaitingBegin if now >= self.begin_deadline => {
                return Some(BootstrapOutcome::Failed(BootstrapFailure::NeverBegan));
            }
            Phase::Restarting { grace_until } if now >= grace_until => {
                return Some(BootstrapOutcome::Completed(BootstrapSuccess::RestartGrace));
            }
            _ => {}
        }
        (now >= self.hard_deadline).then_some(BootstrapOutcome::TimedOut)
    }
}

impl WatchSession<'_> {
    /// Runs the bootstrap watch to completion.
    ///
    /// A begun marker must arrive within the begin window. After that, a
    /// failure marker fails the session, the API start marker completes it,
    /// and a restart marker completes it once the grace period passes
    /// without a failure marker.
    pub fn watch_for_bootstrap(self, timings: BootstrapTimings, on_progress: &mut dyn FnMut(u8)) -> BootstrapOutcome {
        let outcome = match self.wait_for_file(timings.file_wait, timings.poll_interval) {
            FileWait::Superseded => BootstrapOutcome::Superseded,
            FileWait::Missing => BootstrapOutcome::Failed(BootstrapFailure::LogFileMissing),
            found => {
                let mut protocol = BootstrapProtocol::new(self.opened_at(), timings);
                let tailer = self.tailer_for(found);
                match self.tail(tailer, &mut protocol, timings.poll_interval, on_progress) {
                    Resolution::Resolved(outcome) => outcome,
                    Resolution::Superseded => BootstrapOutcome::Superseded,
                }
            }
        };
        info!(
            target: WATCH_TARGET,
            path = %self.log_path().display(),
            outcome = ?outcome,
            "bootstrap watch resolved"
        );
        outcome
    }
}
