//! Behavioural tests for log watch sessions against a real log file.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use time::PrimitiveDateTime;
use time::macros::datetime;
use warden_core::admin::ApiProbe;
use warden_core::supervisor::LivenessProbe;
use warden_core::watch::{
    API_STARTED, BootstrapFailure, BootstrapOutcome, BootstrapSuccess, BootstrapTimings, NODE_RESTARTING,
    REPOSITORY_FAILURE, StartupFailure, StartupOutcome, StartupTimings, StartupWatch, WatchRegistry,
};

const SESSION_START: PrimitiveDateTime = datetime!(2024-05-01 12:00:00);
const BEFORE: &str = "2024-05-01 11:59:00";
const AFTER: &str = "2024-05-01 12:00:05";
const WRITE_DELAY: Duration = Duration::from_millis(200);
const RESTART_GRACE: Duration = Duration::from_millis(400);

struct AlwaysAlive;

impl LivenessProbe for AlwaysAlive {
    fn is_alive(&self, _label: &str) -> bool {
        true
    }
}

struct SilentApi;

impl ApiProbe for SilentApi {
    fn is_responding(&self) -> bool {
        false
    }
}

struct LogWatchWorld {
    dir: TempDir,
    registry: WatchRegistry,
    pending: Vec<String>,
    startup: Option<StartupOutcome>,
    bootstrap: Option<BootstrapOutcome>,
    elapsed: Duration,
}

impl LogWatchWorld {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            registry: WatchRegistry::new(),
            pending: Vec::new(),
            startup: None,
            bootstrap: None,
            elapsed: Duration::ZERO,
        }
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("qortal.log")
    }

    fn schedule(&mut self, stamp: &str, message: &str) {
        self.pending.push(format!("{stamp} INFO  Controller - {message}"));
    }
}

fn startup_timings() -> StartupTimings {
    StartupTimings {
        poll_interval: Duration::from_millis(20),
        file_wait: Duration::from_secs(2),
        overall: Duration::from_millis(1500),
        api_poll_interval: Duration::from_millis(20),
        api_poll_window: Duration::from_millis(200),
    }
}

fn bootstrap_timings() -> BootstrapTimings {
    BootstrapTimings {
        poll_interval: Duration::from_millis(20),
        file_wait: Duration::from_secs(2),
        begin_window: Duration::from_millis(500),
        restart_grace: RESTART_GRACE,
        overall: Duration::from_secs(5),
    }
}

fn append(path: &Path, line: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log");
    writeln!(file, "{line}").expect("append log line");
}

/// Runs `watch` while a writer appends the pending lines one by one.
fn with_writer<T>(world: &LogWatchWorld, watch: impl FnOnce() -> T) -> T {
    let path = world.log_path();
    thread::scope(|scope| {
        scope.spawn(|| {
            for line in &world.pending {
                thread::sleep(WRITE_DELAY);
                append(&path, line);
            }
        });
        watch()
    })
}

#[fixture]
fn world() -> RefCell<LogWatchWorld> {
    RefCell::new(LogWatchWorld::new())
}

#[given("no node log exists yet")]
fn no_log(world: &RefCell<LogWatchWorld>) {
    assert!(!world.borrow().log_path().exists());
}

#[given("an empty node log")]
fn empty_log(world: &RefCell<LogWatchWorld>) {
    fs::write(world.borrow().log_path(), "").expect("create log");
}

#[given("the node log already holds an API start line stamped before the session")]
fn stale_api_line(world: &RefCell<LogWatchWorld>) {
    let path = world.borrow().log_path();
    append(&path, &format!("{BEFORE} INFO  ApiService - {API_STARTED} 12391"));
}

#[given("the node will create its log with an API start line")]
fn will_start_api(world: &RefCell<LogWatchWorld>) {
    world
        .borrow_mut()
        .schedule(AFTER, &format!("{API_STARTED} 12391"));
}

#[given("the node will log a repository failure after the session start")]
fn will_fail_repository(world: &RefCell<LogWatchWorld>) {
    world
        .borrow_mut()
        .schedule(AFTER, &format!("{REPOSITORY_FAILURE}: database locked"));
}

#[given("the node will log a bootstrap start followed by a restart")]
fn will_restart(world: &RefCell<LogWatchWorld>) {
    let mut world = world.borrow_mut();
    world.schedule(AFTER, "Bootstrapping...");
    world.schedule(AFTER, NODE_RESTARTING);
}

#[when("the startup watch runs")]
fn run_startup_watch(world: &RefCell<LogWatchWorld>) {
    let (outcome, elapsed) = {
        let world = world.borrow();
        let watch = StartupWatch::new(&AlwaysAlive, &SilentApi, "qortal.jar").with_timings(startup_timings());
        let session = world.registry.open(world.log_path(), SESSION_START);
        let begin = Instant::now();
        let outcome = with_writer(&world, || session.watch_for_api_start(&watch, &mut |_| {}));
        (outcome, begin.elapsed())
    };
    let mut world = world.borrow_mut();
    world.startup = Some(outcome);
    world.elapsed = elapsed;
}

#[when("the bootstrap watch runs")]
fn run_bootstrap_watch(world: &RefCell<LogWatchWorld>) {
    let (outcome, elapsed) = {
        let world = world.borrow();
        let session = world.registry.open(world.log_path(), SESSION_START);
        let begin = Instant::now();
        let outcome = with_writer(&world, || session.watch_for_bootstrap(bootstrap_timings(), &mut |_| {}));
        (outcome, begin.elapsed())
    };
    let mut world = world.borrow_mut();
    world.bootstrap = Some(outcome);
    world.elapsed = elapsed;
}

#[then("the startup watch resolves as started")]
fn startup_started(world: &RefCell<LogWatchWorld>) {
    assert_eq!(world.borrow().startup, Some(StartupOutcome::Started));
}

#[then("the startup watch resolves as a repository failure")]
fn startup_repository_failure(world: &RefCell<LogWatchWorld>) {
    assert_eq!(
        world.borrow().startup,
        Some(StartupOutcome::Failed(StartupFailure::RepositoryUnavailable))
    );
}

#[then("the startup watch resolves as timed out")]
fn startup_timed_out(world: &RefCell<LogWatchWorld>) {
    let world = world.borrow();
    assert_eq!(world.startup, Some(StartupOutcome::TimedOut));
    assert!(world.elapsed >= startup_timings().overall);
}

#[then("the bootstrap watch completes after the restart grace period")]
fn bootstrap_restart_grace(world: &RefCell<LogWatchWorld>) {
    let world = world.borrow();
    assert_eq!(
        world.bootstrap,
        Some(BootstrapOutcome::Completed(BootstrapSuccess::RestartGrace))
    );
    assert!(world.elapsed >= RESTART_GRACE);
}

#[then("the bootstrap watch fails because it never began")]
fn bootstrap_never_began(world: &RefCell<LogWatchWorld>) {
    assert_eq!(
        world.borrow().bootstrap,
        Some(BootstrapOutcome::Failed(BootstrapFailure::NeverBegan))
    );
}

#[then("no watch session remains open")]
fn no_session_open(world: &RefCell<LogWatchWorld>) {
    let world = world.borrow();
    assert!(!world.registry.is_active(&world.log_path()));
}

#[scenario(
    path = "tests/features/log_watch.feature",
    name = "Startup succeeds when the log appears late"
)]
fn startup_from_late_log(world: RefCell<LogWatchWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/log_watch.feature", name = "Stale milestones are ignored")]
fn stale_milestones(world: RefCell<LogWatchWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/log_watch.feature",
    name = "Startup times out without a milestone"
)]
fn startup_timeout(world: RefCell<LogWatchWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/log_watch.feature",
    name = "A quiet restart completes the bootstrap"
)]
fn quiet_restart(world: RefCell<LogWatchWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/log_watch.feature",
    name = "A bootstrap that never begins fails"
)]
fn never_began(world: RefCell<LogWatchWorld>) {
    let _ = world;
}
