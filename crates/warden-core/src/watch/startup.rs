//! Startup watch: waits for the node to announce its control API.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::line::{API_STARTED, BOOTSTRAP_DOWNLOADING, BOOTSTRAP_EXTRACTING, REPOSITORY_FAILURE};
use super::session::{FileWait, LineProtocol, Resolution, Verdict, WatchSession};
use super::{StartupTimings, WATCH_TARGET};
use crate::admin::ApiProbe;
use crate::supervisor::LivenessProbe;

const DOWNLOAD_PROGRESS: u8 = 50;
const EXTRACT_PROGRESS: u8 = 75;

/// Why startup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFailure {
    /// The node logged that its repository could not be opened.
    RepositoryUnavailable,
    /// The node process disappeared while the control API was polled.
    ProcessExited,
}

/// How a startup watch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The control API came up.
    Started,
    /// The node reported or exhibited a failure.
    Failed(StartupFailure),
    /// Nothing conclusive happened within the bound.
    TimedOut,
    /// A newer session for the same log took over.
    Superseded,
}

impl StartupOutcome {
    /// Whether the node is confirmed started.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Started)
    }
}

/// Capabilities and bounds a startup watch runs with.
pub struct StartupWatch<'a> {
    liveness: &'a dyn LivenessProbe,
    api: &'a dyn ApiProbe,
    process_label: &'a str,
    timings: StartupTimings,
}

impl<'a> StartupWatch<'a> {
    /// Builds a watch with the default timings.
    #[must_use]
    pub fn new(liveness: &'a dyn LivenessProbe, api: &'a dyn ApiProbe, process_label: &'a str) -> Self {
        Self {
            liveness,
            api,
            process_label,
            timings: StartupTimings::default(),
        }
    }

    /// Overrides the timings.
    #[must_use]
    pub const fn with_timings(mut self, timings: StartupTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Timings in effect.
    #[must_use]
    pub const fn timings(&self) -> StartupTimings {
        self.timings
    }
}

struct StartupProtocol {
    deadline: Instant,
}

impl LineProtocol for StartupProtocol {
    type Outcome = StartupOutcome;

    fn on_line(&mut self, text: &str, _now: Instant) -> Verdict<StartupOutcome> {
        if text.contains(API_STARTED) {
            Verdict::Resolve(StartupOutcome::Started)
        } else if text.contains(REPOSITORY_FAILURE) {
            Verdict::Resolve(StartupOutcome::Failed(StartupFailure::RepositoryUnavailable))
        } else if text.contains(BOOTSTRAP_DOWNLOADING) {
            Verdict::Progress(DOWNLOAD_PROGRESS)
        } else if text.contains(BOOTSTRAP_EXTRACTING) {
            Verdict::Progress(EXTRACT_PROGRESS)
        } else {
            Verdict::Ignore
        }
    }

    fn on_tick(&mut self, now: Instant) -> Option<StartupOutcome> {
        (now >= self.deadline).then_some(StartupOutcome::TimedOut)
    }
}

impl WatchSession<'_> {
    /// Runs the startup watch to completion.
    ///
    /// Tails the log for the API start or repository failure markers,
    /// reporting bootstrap progress along the way. When the log never
    /// appears, polls the control API instead, failing early if the node
    /// process is gone.
    pub fn watch_for_api_start(self, watch: &StartupWatch<'_>, on_progress: &mut dyn FnMut(u8)) -> StartupOutcome {
        let timings = watch.timings;
        let outcome = match self.wait_for_file(timings.file_wait, timings.poll_interval) {
            FileWait::Superseded => StartupOutcome::Superseded,
            FileWait::Missing => {
                warn!(
                    target: WATCH_TARGET,
                    path = %self.log_path().display(),
                    "log file never appeared; polling control API"
                );
                self.poll_api(watch)
            }
            found => {
                let mut protocol = StartupProtocol {
                    deadline: self.opened_at() + timings.overall,
                };
                let tailer = self.tailer_for(found);
                match self.tail(tailer, &mut protocol, timings.poll_interval, on_progress) {
                    Resolution::Resolved(outcome) => outcome,
                    Resolution::Superseded => StartupOutcome::Superseded,
                }
            }
        };
        info!(
            target: WATCH_TARGET,
            path = %self.log_path().display(),
            outcome = ?outcome,
            "startup watch resolved"
        );
        outcome
    }

    fn poll_api(&self, watch: &StartupWatch<'_>) -> StartupOutcome {
        let timings = watch.timings;
        let interval = timings.api_poll_interval.max(Duration::from_millis(1));
        let rounds = timings
            .api_poll_window
            .as_millis()
            .checked_div(interval.as_millis())
            .unwrap_or_default();
        let attempts = u32::try_from(rounds)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let deadline = Instant::now() + timings.api_poll_window;

        for attempt in 0..attempts {
            if self.is_superseded() {
                return StartupOutcome::Superseded;
            }
            if !watch.liveness.is_alive(watch.process_label) {
                warn!(target: WATCH_TARGET, attempt, "node process gone while polling control API");
                return StartupOutcome::Failed(StartupFailure::ProcessExited);
            }
            if watch.api.is_responding() {
                return StartupOutcome::Started;
            }
            if Instant::now() >= deadline {
                break;
            }
            if !self.pause(interval, timings.poll_interval) {
                return StartupOutcome::Superseded;
            }
        }
        StartupOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::thread;

    use mockall::predicate::eq;
    use rstest::rstest;
    use tempfile::TempDir;
    use time::macros::datetime;

    use super::*;
    use crate::admin::MockApiProbe;
    use crate::supervisor::MockLivenessProbe;
    use crate::watch::WatchRegistry;

    fn fast_timings() -> StartupTimings {
        StartupTimings {
            poll_interval: Duration::from_millis(10),
            file_wait: Duration::from_millis(200),
            overall: Duration::from_secs(5),
            api_poll_interval: Duration::from_millis(20),
            api_poll_window: Duration::from_millis(200),
        }
    }

    fn never_called_api() -> MockApiProbe {
        let mut api = MockApiProbe::new();
        api.expect_is_responding().never();
        api
    }

    fn never_called_liveness() -> MockLivenessProbe {
        let mut liveness = MockLivenessProbe::new();
        liveness.expect_is_alive().never();
        liveness
    }

    #[rstest]
    #[case::api("2024-05-01 12:00:01 INFO Starting API on port 12391", Verdict::Resolve(StartupOutcome::Started))]
    #[case::repository(
        "2024-05-01 12:00:01 ERROR Unable to start repository",
        Verdict::Resolve(StartupOutcome::Failed(StartupFailure::RepositoryUnavailable))
    )]
    #[case::downloading("2024-05-01 12:00:01 INFO Downloading full node bootstrap...", Verdict::Progress(50))]
    #[case::extracting("2024-05-01 12:00:01 INFO Extracting bootstrap...", Verdict::Progress(75))]
    #[case::unrelated("2024-05-01 12:00:01 INFO Synchronising", Verdict::Ignore)]
    fn classifies_lines(#[case] line: &str, #[case] expected: Verdict<StartupOutcome>) {
        let now = Instant::now();
        let mut protocol = StartupProtocol {
            deadline: now + Duration::from_secs(1),
        };
        assert_eq!(protocol.on_line(line, now), expected);
    }

    #[test]
    fn deadline_resolves_as_timeout() {
        let now = Instant::now();
        let mut protocol = StartupProtocol { deadline: now };
        assert_eq!(protocol.on_tick(now), Some(StartupOutcome::TimedOut));
    }

    #[test]
    fn stale_success_line_is_ignored_until_a_fresh_one_arrives() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("qortal.log");
        fs::write(&log, "2024-05-01 11:59:00 INFO Starting API on port 12391\n").expect("seed log");
        let registry = WatchRegistry::new();
        let liveness = never_called_liveness();
        let api = never_called_api();
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(fast_timings());
        let session = registry.open(&log, datetime!(2024-05-01 12:00:00));

        let outcome = thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                let mut file = OpenOptions::new().append(true).open(&log).expect("open log");
                file.write_all(
                    concat!(
                        "2024-05-01 12:00:00 INFO Starting API on port 12391\n",
                        "2024-05-01 12:00:05 ERROR Unable to start repository\n",
                    )
                    .as_bytes(),
                )
                .expect("append log");
            });
            session.watch_for_api_start(&watch, &mut |_| {})
        });

        assert_eq!(
            outcome,
            StartupOutcome::Failed(StartupFailure::RepositoryUnavailable)
        );
    }

    #[test]
    fn reports_bootstrap_progress_before_success() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("qortal.log");
        let registry = WatchRegistry::new();
        let liveness = never_called_liveness();
        let api = never_called_api();
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(fast_timings());
        let session = registry.open(&log, datetime!(2024-05-01 12:00:00));
        let mut seen = Vec::new();

        let outcome = thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                fs::write(
                    &log,
                    concat!(
                        "2024-05-01 12:00:01 INFO Downloading full node bootstrap...\n",
                        "2024-05-01 12:00:02 INFO Extracting bootstrap...\n",
                        "2024-05-01 12:00:03 INFO Starting API on port 12391\n",
                    ),
                )
                .expect("write log");
            });
            session.watch_for_api_start(&watch, &mut |percent| seen.push(percent))
        });

        assert_eq!(outcome, StartupOutcome::Started);
        assert_eq!(seen, [50, 75]);
    }

    #[test]
    fn times_out_without_a_milestone() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("qortal.log");
        fs::write(&log, "").expect("touch log");
        let registry = WatchRegistry::new();
        let liveness = never_called_liveness();
        let api = never_called_api();
        let timings = StartupTimings {
            overall: Duration::from_millis(100),
            ..fast_timings()
        };
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(timings);

        let outcome = registry
            .open(&log, datetime!(2024-05-01 12:00:00))
            .watch_for_api_start(&watch, &mut |_| {});

        assert_eq!(outcome, StartupOutcome::TimedOut);
        assert!(!registry.is_active(&log));
    }

    #[test]
    fn missing_log_falls_back_to_api_polling() {
        let temp = TempDir::new().expect("temp dir");
        let registry = WatchRegistry::new();
        let mut liveness = MockLivenessProbe::new();
        liveness
            .expect_is_alive()
            .with(eq("qortal.jar"))
            .times(2)
            .return_const(true);
        let mut api = MockApiProbe::new();
        let mut answers = [false, true].into_iter();
        api.expect_is_responding()
            .times(2)
            .returning(move || answers.next().unwrap_or(true));
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(fast_timings());

        let outcome = registry
            .open(temp.path().join("qortal.log"), datetime!(2024-05-01 12:00:00))
            .watch_for_api_start(&watch, &mut |_| {});

        assert_eq!(outcome, StartupOutcome::Started);
    }

    #[test]
    fn api_polling_fails_fast_when_the_process_is_gone() {
        let temp = TempDir::new().expect("temp dir");
        let registry = WatchRegistry::new();
        let mut liveness = MockLivenessProbe::new();
        liveness.expect_is_alive().times(1).return_const(false);
        let api = never_called_api();
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(fast_timings());

        let outcome = registry
            .open(temp.path().join("qortal.log"), datetime!(2024-05-01 12:00:00))
            .watch_for_api_start(&watch, &mut |_| {});

        assert_eq!(outcome, StartupOutcome::Failed(StartupFailure::ProcessExited));
    }

    #[test]
    fn api_polling_is_bounded() {
        let temp = TempDir::new().expect("temp dir");
        let registry = WatchRegistry::new();
        let mut liveness = MockLivenessProbe::new();
        liveness.expect_is_alive().return_const(true);
        let mut api = MockApiProbe::new();
        api.expect_is_responding().return_const(false);
        let watch = StartupWatch::new(&liveness, &api, "qortal.jar").with_timings(fast_timings());

        let outcome = registry
            .open(temp.path().join("qortal.log"), datetime!(2024-05-01 12:00:00))
            .watch_for_api_start(&watch, &mut |_| {});

        assert_eq!(outcome, StartupOutcome::TimedOut);
    }
}
