//! Session ownership and the shared tailing loop.
//!
//! A [`WatchRegistry`] admits one session per log file. Opening a second
//! session for the same file marks the first as superseded and blocks until
//! its lease is dropped, so the new session never overlaps the old one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use time::PrimitiveDateTime;
use tracing::{debug, info, warn};

use super::WATCH_TARGET;
use super::line::is_fresh;
use super::tailer::LogTailer;

/// End of a log file recorded before the node is asked to act.
///
/// A session opened from a mark reads everything appended after the mark
/// was taken, including lines written before the session itself opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMark {
    path: PathBuf,
    length: Option<u64>,
}

impl LogMark {
    /// Records the current length of `path`; an absent file marks nothing.
    #[must_use]
    pub fn take(path: impl Into<PathBuf>) -> Self {
        let log_path = path.into();
        let length = log_path.metadata().ok().map(|metadata| metadata.len());
        Self {
            path: log_path,
            length,
        }
    }

    /// Log file the mark refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the file when the mark was taken.
    #[must_use]
    pub const fn length(&self) -> Option<u64> {
        self.length
    }
}

/// Where tailing begins for a file that exists when the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Baseline {
    SessionOpen,
    Marked(Option<u64>),
}

#[derive(Debug)]
struct SessionSlot {
    id: u64,
    superseded: AtomicBool,
}

/// Tracks the active session for every watched log file.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    sessions: Mutex<HashMap<PathBuf, Arc<SessionSlot>>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl WatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session on `log_path`, superseding any session already
    /// watching it and waiting for that session to release its resources.
    pub fn open(&self, log_path: impl Into<PathBuf>, started_at: PrimitiveDateTime) -> WatchSession<'_> {
        self.admit(log_path.into(), started_at, Baseline::SessionOpen)
    }

    /// Opens a session that reads from `mark` rather than from the end of
    /// the file at open time.
    pub fn open_from(&self, mark: LogMark, started_at: PrimitiveDateTime) -> WatchSession<'_> {
        self.admit(mark.path, started_at, Baseline::Marked(mark.length))
    }

    fn admit(&self, log_path: PathBuf, started_at: PrimitiveDateTime, baseline: Baseline) -> WatchSession<'_> {
        let slot = Arc::new(SessionSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            superseded: AtomicBool::new(false),
        });

        let mut sessions = self.lock();
        while let Some(prior) = sessions.get(&log_path).cloned() {
            prior.superseded.store(true, Ordering::Release);
            info!(
                target: WATCH_TARGET,
                path = %log_path.display(),
                prior = prior.id,
                session = slot.id,
                "superseding active watch session"
            );
            while sessions
                .get(&log_path)
                .is_some_and(|current| Arc::ptr_eq(current, &prior))
            {
                sessions = self
                    .released
                    .wait(sessions)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        sessions.insert(log_path.clone(), Arc::clone(&slot));
        drop(sessions);

        debug!(target: WATCH_TARGET, path = %log_path.display(), session = slot.id, "watch session opened");
        WatchSession {
            lease: SessionLease {
                registry: self,
                path: log_path.clone(),
                slot,
            },
            log_path,
            started_at,
            opened_at: Instant::now(),
            baseline,
        }
    }

    /// Whether a session currently watches `log_path`.
    #[must_use]
    pub fn is_active(&self, log_path: &Path) -> bool {
        self.lock().contains_key(log_path)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<SessionSlot>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry membership of one session; released exactly once on drop.
#[derive(Debug)]
struct SessionLease<'r> {
    registry: &'r WatchRegistry,
    path: PathBuf,
    slot: Arc<SessionSlot>,
}

impl SessionLease<'_> {
    fn is_superseded(&self) -> bool {
        self.slot.superseded.load(Ordering::Acquire)
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let mut sessions = self.registry.lock();
        if sessions
            .get(&self.path)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            sessions.remove(&self.path);
        }
        drop(sessions);
        self.registry.released.notify_all();
        debug!(target: WATCH_TARGET, path = %self.path.display(), session = self.slot.id, "watch session released");
    }
}

/// One run of the log-watch state machine over one log file.
///
/// Sessions are consumed by the protocol that runs them, so each resolves
/// at most once.
#[derive(Debug)]
pub struct WatchSession<'r> {
    lease: SessionLease<'r>,
    log_path: PathBuf,
    started_at: PrimitiveDateTime,
    opened_at: Instant,
    baseline: Baseline,
}

/// How the wait for the log file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileWait {
    /// The file was already present when the session opened.
    Existing,
    /// The file appeared while waiting.
    Created,
    /// The file did not appear in time.
    Missing,
    /// A newer session took over.
    Superseded,
}

/// What a protocol makes of one fresh line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict<O> {
    Ignore,
    Progress(u8),
    Resolve(O),
}

/// A line-driven state machine with its own deadlines.
pub(crate) trait LineProtocol {
    type Outcome;

    /// Evaluates one line stamped after the session start.
    fn on_line(&mut self, text: &str, now: Instant) -> Verdict<Self::Outcome>;

    /// Checks deadlines once per poll.
    fn on_tick(&mut self, now: Instant) -> Option<Self::Outcome>;
}

/// Result of the shared tailing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution<O> {
    Resolved(O),
    Superseded,
}

impl WatchSession<'_> {
    /// Log file under watch.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Lines stamped at or before this moment are ignored.
    #[must_use]
    pub const fn started_at(&self) -> PrimitiveDateTime {
        self.started_at
    }

    pub(crate) const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub(crate) fn is_superseded(&self) -> bool {
        self.lease.is_superseded()
    }

    /// Waits up to `bound` from session open for the log file to exist.
    pub(crate) fn wait_for_file(&self, bound: Duration, poll: Duration) -> FileWait {
        if self.log_path.exists() {
            return FileWait::Existing;
        }
        let deadline = self.opened_at + bound;
        loop {
            if self.is_superseded() {
                return FileWait::Superseded;
            }
            if self.log_path.exists() {
                debug!(target: WATCH_TARGET, path = %self.log_path.display(), "log file appeared");
                return FileWait::Created;
            }
            let now = Instant::now();
            if now >= deadline {
                return FileWait::Missing;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    /// Builds the tailer matching how the file was found.
    ///
    /// A file created during the session, or absent when the session was
    /// marked, is read in full since everything in it is new. A marked file
    /// resumes from the mark; otherwise tailing starts at the current end.
    pub(crate) fn tailer_for(&self, wait: FileWait) -> LogTailer {
        match (wait, self.baseline) {
            (FileWait::Created, _) | (_, Baseline::Marked(None)) => LogTailer::from_start(&self.log_path),
            (_, Baseline::Marked(Some(length))) => LogTailer::at_offset(&self.log_path, length),
            (_, Baseline::SessionOpen) => LogTailer::at_end(&self.log_path).unwrap_or_else(|error| {
                warn!(
                    target: WATCH_TARGET,
                    path = %self.log_path.display(),
                    error = %error,
                    "could not size log file; reading from start"
                );
                LogTailer::from_start(&self.log_path)
            }),
        }
    }

    /// Sleeps for `duration` in slices of `poll`, returning `false` early if
    /// the session is superseded.
    pub(crate) fn pause(&self, duration: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_superseded() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    /// Feeds fresh lines to `protocol` until it resolves.
    pub(crate) fn tail<P: LineProtocol>(
        &self,
        mut tailer: LogTailer,
        protocol: &mut P,
        poll: Duration,
        on_progress: &mut dyn FnMut(u8),
    ) -> Resolution<P::Outcome> {
        loop {
            if self.is_superseded() {
                return Resolution::Superseded;
            }
            let lines = tailer.poll().unwrap_or_else(|error| {
                warn!(
                    target: WATCH_TARGET,
                    path = %self.log_path.display(),
                    error = %error,
                    "failed to read log file"
                );
                Vec::new()
            });
            let now = Instant::now();
            for line in lines.iter().filter(|line| is_fresh(line, self.started_at)) {
                match protocol.on_line(line, now) {
                    Verdict::Ignore => {}
                    Verdict::Progress(percent) => on_progress(percent),
                    Verdict::Resolve(outcome) => return Resolution::Resolved(outcome),
                }
            }
            if let Some(outcome) = protocol.on_tick(now) {
                return Resolution::Resolved(outcome);
            }
            thread::sleep(poll);
        }
    }
}
