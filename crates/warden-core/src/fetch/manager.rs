//! At-most-one-in-flight downloads per artifact class.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use strum::Display;
use tracing::info;

use super::{FETCH_TARGET, FetchError, Fetcher, Progress};

/// Category of downloadable payload sharing one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactClass {
    /// Bundled Java runtime archive.
    Runtime,
    /// Node software archive.
    Node,
    /// Native node installer.
    Installer,
}

/// One artifact to download, optionally from a pair of mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Preferred source.
    pub primary_url: String,
    /// Fallback used when the primary fails its existence probe.
    pub backup_url: Option<String>,
    /// File the artifact is written to.
    pub destination: PathBuf,
}

impl DownloadJob {
    /// A job with a single source.
    #[must_use]
    pub fn single(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            primary_url: url.into(),
            backup_url: None,
            destination: destination.into(),
        }
    }

    /// A job choosing between two mirrors.
    #[must_use]
    pub fn mirrored(
        primary: impl Into<String>,
        backup: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            primary_url: primary.into(),
            backup_url: Some(backup.into()),
            destination: destination.into(),
        }
    }
}

/// Result of asking the manager for a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The artifact was written to this path.
    Completed(PathBuf),
    /// Another download of the same class was already running; nothing was
    /// requested.
    AlreadyInFlight,
}

/// Owns the fetcher and one in-flight flag per artifact class.
#[derive(Debug)]
pub struct DownloadManager {
    fetcher: Fetcher,
    runtime: AtomicBool,
    node: AtomicBool,
    installer: AtomicBool,
}

/// Clears its class flag when dropped.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl DownloadManager {
    /// Wraps `fetcher`.
    #[must_use]
    pub const fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            runtime: AtomicBool::new(false),
            node: AtomicBool::new(false),
            installer: AtomicBool::new(false),
        }
    }

    /// The underlying fetcher.
    #[must_use]
    pub const fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Whether a download of `class` is running.
    #[must_use]
    pub fn is_in_flight(&self, class: ArtifactClass) -> bool {
        self.flag(class).load(Ordering::Acquire)
    }

    /// Downloads `job` unless a download of `class` is already running.
    pub fn download(
        &self,
        class: ArtifactClass,
        job: &DownloadJob,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<DownloadOutcome, FetchError> {
        let Some(_guard) = self.claim(class) else {
            info!(
                target: FETCH_TARGET,
                class = %class,
                "download already in flight; ignoring request"
            );
            return Ok(DownloadOutcome::AlreadyInFlight);
        };

        let url = job
            .backup_url
            .as_deref()
            .map_or(job.primary_url.as_str(), |backup| {
                self.fetcher.pick_mirror(&job.primary_url, backup)
            });
        self.fetcher
            .fetch(url, &job.destination, on_progress)
            .map(DownloadOutcome::Completed)
    }

    fn claim(&self, class: ArtifactClass) -> Option<InFlightGuard<'_>> {
        let flag = self.flag(class);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag })
    }

    const fn flag(&self, class: ArtifactClass) -> &AtomicBool {
        match class {
            ArtifactClass::Runtime => &self.runtime,
            ArtifactClass::Node => &self.node,
            ArtifactClass::Installer => &self.installer,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use httpmock::prelude::*;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn overlapping_requests_issue_one_http_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/node.zip");
            then.status(200)
                .body("payload")
                .delay(Duration::from_millis(600));
        });
        let temp = TempDir::new().expect("temp dir");
        let manager = DownloadManager::new(Fetcher::new().expect("fetcher"));
        let job = DownloadJob::single(server.url("/node.zip"), temp.path().join("node.zip"));

        let (first, second) = thread::scope(|scope| {
            let first = scope.spawn(|| manager.download(ArtifactClass::Node, &job, &mut |_| {}));
            thread::sleep(Duration::from_millis(150));
            let second = manager.download(ArtifactClass::Node, &job, &mut |_| {});
            (first.join().expect("first download thread"), second)
        });

        assert_eq!(second.expect("second call"), DownloadOutcome::AlreadyInFlight);
        assert_eq!(
            first.expect("first call"),
            DownloadOutcome::Completed(temp.path().join("node.zip"))
        );
        mock.assert_hits(1);
        assert!(!manager.is_in_flight(ArtifactClass::Node));
    }

    #[test]
    fn classes_do_not_block_each_other() {
        let manager = DownloadManager::new(Fetcher::new().expect("fetcher"));
        let _runtime = manager.claim(ArtifactClass::Runtime).expect("runtime claim");
        assert!(manager.claim(ArtifactClass::Runtime).is_none());
        assert!(manager.claim(ArtifactClass::Node).is_some());
    }

    #[test]
    fn failed_download_releases_the_class() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.zip");
            then.status(404);
        });
        let temp = TempDir::new().expect("temp dir");
        let manager = DownloadManager::new(Fetcher::new().expect("fetcher"));
        let job = DownloadJob::single(server.url("/missing.zip"), temp.path().join("x.zip"));

        let result = manager.download(ArtifactClass::Runtime, &job, &mut |_| {});
        assert!(matches!(result, Err(FetchError::Status { .. })));
        assert!(!manager.is_in_flight(ArtifactClass::Runtime));
    }
}
