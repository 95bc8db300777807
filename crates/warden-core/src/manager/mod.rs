//! High-level node lifecycle operations.
//!
//! [`NodeManager`] threads one [`PlatformProfile`] through the components and
//! re-resolves the install location at the start of every operation, so a
//! custom directory chosen between calls is always honoured.

mod errors;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use errors::AtStep;
pub use errors::{PipelineError, PipelineStep, StepError};
pub use pipeline::{BootstrapSummary, InstallSummary, StartReport};

use crate::admin::{AdminClient, ApiKeyStore};
use crate::fetch::{DownloadManager, FetchError, Fetcher};
use crate::install::{ArchiveInstaller, NativeInstaller};
use crate::location::{InstallLocation, SharedSettings, resolve_checked};
use crate::platform::PlatformProfile;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStep, StructuredProgressReporter};
use crate::repository::{RepositoryError, db_dir, remove_db, resolve_repository_path};
use crate::supervisor::{LivenessProbe, NodeStopper, RuntimeInfo, StopOutcome, StopTimings, detect_runtime};
use crate::watch::{BootstrapTimings, LocalClock, StartupTimings, WatchRegistry};

const MANAGER_TARGET: &str = "warden::manager";

/// Bounds for every wait a lifecycle operation performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerTimings {
    /// Startup watch windows.
    pub startup: StartupTimings,
    /// Bootstrap watch windows.
    pub bootstrap: BootstrapTimings,
    /// Stop confirmation polling.
    pub stop: StopTimings,
}

/// Snapshot of the node on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Install location in effect.
    pub location: InstallLocation,
    /// Whether this platform runs the node on a Java runtime.
    pub runtime_required: bool,
    /// Runtime that would launch the node, if any.
    pub runtime: Option<RuntimeInfo>,
    /// Whether the node software is installed at `location`.
    pub installed: bool,
    /// Whether the node process is alive.
    pub running: bool,
}

/// Entry point for installing, starting, stopping and bootstrapping the node.
pub struct NodeManager {
    profile: PlatformProfile,
    settings: SharedSettings,
    downloads: DownloadManager,
    archives: ArchiveInstaller,
    installers: NativeInstaller,
    admin: AdminClient,
    liveness: Box<dyn LivenessProbe>,
    watches: WatchRegistry,
    clock: LocalClock,
    progress: Arc<dyn ProgressSink>,
    timings: ManagerTimings,
}

impl NodeManager {
    /// Builds a manager with the default fetcher, timings and a tracing
    /// progress reporter.
    ///
    /// The local clock offset is detected here, so build the manager before
    /// spawning threads.
    pub fn new(
        profile: PlatformProfile,
        settings: SharedSettings,
        admin: AdminClient,
        liveness: Box<dyn LivenessProbe>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            profile,
            settings,
            downloads: DownloadManager::new(Fetcher::new()?),
            archives: ArchiveInstaller,
            installers: NativeInstaller,
            admin,
            liveness,
            watches: WatchRegistry::new(),
            clock: LocalClock::detect(),
            progress: Arc::new(StructuredProgressReporter::new()),
            timings: ManagerTimings::default(),
        })
    }

    /// Replaces the download manager.
    #[must_use]
    pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
        self.downloads = downloads;
        self
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the clock used to stamp watch sessions.
    #[must_use]
    pub const fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the timings.
    #[must_use]
    pub const fn with_timings(mut self, timings: ManagerTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Platform profile in use.
    #[must_use]
    pub const fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Shared settings store.
    #[must_use]
    pub const fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Download manager, for in-flight queries.
    #[must_use]
    pub const fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// Registry of log watch sessions.
    #[must_use]
    pub const fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// Resolves the install location, clearing a stale custom directory.
    pub fn location(&self) -> Result<InstallLocation, PipelineError> {
        resolve_checked(&self.settings, &self.profile).at(PipelineStep::ResolveLocation)
    }

    /// Whether the node software is present at `location`.
    #[must_use]
    pub fn is_installed(&self, location: &InstallLocation) -> bool {
        self.profile.jar_path(location.dir()).is_file()
    }

    /// Whether the node process is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.liveness.is_alive(self.profile.process_label)
    }

    /// Reports runtime, install and liveness state.
    pub fn status(&self) -> Result<NodeStatus, PipelineError> {
        let location = self.location()?;
        let runtime_required = self.profile.uses_runtime();
        Ok(NodeStatus {
            runtime: runtime_required.then(|| detect_runtime(&self.profile)).flatten(),
            installed: self.is_installed(&location),
            running: self.is_running(),
            runtime_required,
            location,
        })
    }

    /// Stops the node, confirming it is gone.
    pub fn stop(&self) -> Result<StopOutcome, PipelineError> {
        let location = self.location()?;
        let outcome = self.stop_at(&location);
        if outcome.is_stopped() {
            Ok(outcome)
        } else {
            Err(PipelineError::new(PipelineStep::StopNode, StepError::StillRunning))
        }
    }

    fn stop_at(&self, location: &InstallLocation) -> StopOutcome {
        NodeStopper::new(&self.profile, location.dir(), &*self.liveness, &self.admin)
            .with_timings(self.timings.stop)
            .stop()
    }

    /// Reads the node API key, generating one when none is stored.
    pub fn api_key(&self) -> Result<String, PipelineError> {
        let location = self.location()?;
        ApiKeyStore::new(&self.admin, location.dir())
            .get_api_key()
            .at(PipelineStep::ManageApiKey)
    }

    /// Discards the stored API key and generates a new one.
    pub fn reset_api_key(&self) -> Result<String, PipelineError> {
        let location = self.location()?;
        ApiKeyStore::new(&self.admin, location.dir())
            .reset_api_key()
            .at(PipelineStep::ManageApiKey)
    }

    /// Records a custom install directory that already holds the node.
    pub fn set_custom_install_dir(&self, dir: &Path) -> Result<(), PipelineError> {
        self.settings
            .set_custom_install_dir(&self.profile, dir)
            .at(PipelineStep::ResolveLocation)
    }

    /// Reverts to the default install directory.
    pub fn clear_custom_install_dir(&self) -> Result<(), PipelineError> {
        self.settings
            .clear_custom_install_dir()
            .at(PipelineStep::ResolveLocation)
    }

    /// Repository root for the current install location.
    pub fn repository_path(&self) -> Result<PathBuf, PipelineError> {
        let location = self.location()?;
        resolve_repository_path(&self.profile, &location).at(PipelineStep::ManageRepository)
    }

    /// Deletes the node's repository database.
    ///
    /// A running node is stopped first; deletion is refused if it cannot be
    /// stopped.
    pub fn delete_repository(&self) -> Result<PathBuf, PipelineError> {
        let location = self.location()?;
        let root = resolve_repository_path(&self.profile, &location).at(PipelineStep::ManageRepository)?;
        let db = db_dir(&root);
        if !db.is_dir() {
            return Err(PipelineError::new(
                PipelineStep::ManageRepository,
                RepositoryError::Missing(db),
            ));
        }
        if !self.stop_at(&location).is_stopped() {
            return Err(PipelineError::new(
                PipelineStep::ManageRepository,
                RepositoryError::NodeRunning(db),
            ));
        }
        let removed = remove_db(&root).at(PipelineStep::ManageRepository)?;
        info!(target: MANAGER_TARGET, path = %removed.display(), "repository deleted");
        Ok(removed)
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.emit(&event);
    }

    fn fail(&self, step: ProgressStep, code: &'static str, error: PipelineError) -> PipelineError {
        self.emit(ProgressEvent::error(step, code));
        error
    }
}
