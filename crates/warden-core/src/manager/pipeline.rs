//! Install, start and bootstrap pipelines.
//!
//! Each pipeline is a fixed sequence of fallible steps. A failing step emits
//! an `error` progress event and stops the sequence with a step-tagged error.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::errors::AtStep;
use super::{MANAGER_TARGET, NodeManager, PipelineError, PipelineStep, StepError};
use crate::admin::{ApiKeyStore, ApiProbe};
use crate::fetch::{ArtifactClass, DownloadJob, DownloadOutcome, Progress};
use crate::location::InstallLocation;
use crate::platform::NodeDistribution;
use crate::progress::{ProgressEvent, ProgressStep};
use crate::supervisor::{LaunchReport, RuntimeInfo, detect_runtime, start_node};
use crate::watch::{BootstrapOutcome, BootstrapSuccess, LogMark, StartupOutcome, StartupWatch, WatchSession};

/// What an install run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    /// Location the node was installed at.
    pub location: InstallLocation,
    /// Runtime in use, absent on native-executable platforms.
    pub runtime: Option<RuntimeInfo>,
    /// How the node was brought up.
    pub start: StartReport,
}

/// How a start request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReport {
    /// The node was already alive; nothing was launched.
    AlreadyRunning,
    /// The node was launched and its startup confirmed.
    Started(LaunchReport),
}

/// What a bootstrap run observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSummary {
    /// Resolution of the bootstrap watch.
    pub bootstrap: BootstrapOutcome,
    /// Resolution of the follow-up startup watch, when one was needed.
    pub startup: Option<StartupOutcome>,
}

impl NodeManager {
    /// Installs whatever is missing, then starts the node and confirms it.
    pub fn install(&self) -> Result<InstallSummary, PipelineError> {
        let location = self.location()?;
        info!(target: MANAGER_TARGET, location = %location.dir().display(), "install pipeline starting");
        let runtime = self.ensure_runtime()?;
        self.ensure_node(&location)?;
        let start = self.start_and_confirm(&location)?;
        Ok(InstallSummary {
            location,
            runtime,
            start,
        })
    }

    /// Starts an installed node and confirms it comes up.
    pub fn start(&self) -> Result<StartReport, PipelineError> {
        let location = self.location()?;
        if !self.is_installed(&location) {
            let error = PipelineError::new(
                PipelineStep::StartNode,
                StepError::NotInstalled(location.dir().to_path_buf()),
            );
            return Err(self.fail(ProgressStep::CoreRunning, "core_not_installed", error));
        }
        self.start_and_confirm(&location)
    }

    /// Triggers a repository bootstrap and follows it to completion.
    ///
    /// Nothing is watched when the trigger is refused. After a successful
    /// bootstrap the node is confirmed running, with a startup watch when its
    /// control API does not already answer.
    pub fn bootstrap(&self) -> Result<BootstrapSummary, PipelineError> {
        let location = self.location()?;
        let step = ProgressStep::Bootstrap;
        self.emit(ProgressEvent::active(step, 0, "bootstrap_requested"));

        let key = ApiKeyStore::new(&self.admin, location.dir())
            .get_api_key()
            .at(PipelineStep::TriggerBootstrap)
            .map_err(|error| self.fail(step, "bootstrap_trigger_failed", error))?;
        let log_path = self.profile.log_path(location.dir());
        let mark = LogMark::take(&log_path);
        let started_at = self.clock.now();
        self.admin
            .bootstrap(&key)
            .at(PipelineStep::TriggerBootstrap)
            .map_err(|error| self.fail(step, "bootstrap_trigger_failed", error))?;

        let bootstrap = self
            .watches
            .open_from(mark, started_at)
            .watch_for_bootstrap(self.timings.bootstrap, &mut |percent| {
                self.emit(ProgressEvent::active(step, percent, "bootstrap_progress"));
            });
        if !bootstrap.is_success() {
            let error = PipelineError::new(PipelineStep::WatchBootstrap, StepError::Bootstrap(bootstrap));
            return Err(self.fail(step, "bootstrap_failed", error));
        }
        self.emit(ProgressEvent::done(step, "bootstrap_complete"));

        if bootstrap == BootstrapOutcome::Completed(BootstrapSuccess::ApiStarted) || self.admin.is_responding() {
            self.emit(ProgressEvent::done(ProgressStep::CoreRunning, "core_started"));
            return Ok(BootstrapSummary {
                bootstrap,
                startup: None,
            });
        }
        let session = self.watches.open(&log_path, self.clock.now());
        let startup = self.confirm_startup(session)?;
        Ok(BootstrapSummary {
            bootstrap,
            startup: Some(startup),
        })
    }

    fn ensure_runtime(&self) -> Result<Option<RuntimeInfo>, PipelineError> {
        let step = ProgressStep::HasJava;
        let Some(bundle) = self.profile.runtime.as_ref() else {
            self.emit(ProgressEvent::off(step, "runtime_not_required"));
            return Ok(None);
        };
        self.emit(ProgressEvent::active(step, 0, "checking_runtime"));
        if let Some(runtime) = detect_runtime(&self.profile) {
            info!(target: MANAGER_TARGET, version = %runtime.version, bundled = runtime.bundled, "runtime present");
            self.emit(ProgressEvent::done(step, "runtime_ready"));
            return Ok(Some(runtime));
        }

        let job = DownloadJob::mirrored(&bundle.source.primary, &bundle.source.backup, &bundle.archive);
        let archive = self
            .download(ArtifactClass::Runtime, &job, step, "downloading_runtime")
            .at(PipelineStep::InstallRuntime)
            .map_err(|error| self.fail(step, "runtime_download_failed", error))?;
        let target = parent_or_self(&bundle.root);
        self.emit(ProgressEvent::active(step, 100, "installing_runtime"));
        self.archives
            .install(&archive, &target, &bundle.root)
            .at(PipelineStep::InstallRuntime)
            .map_err(|error| self.fail(step, "runtime_install_failed", error))?;

        let Some(runtime) = detect_runtime(&self.profile) else {
            let error = PipelineError::new(
                PipelineStep::InstallRuntime,
                StepError::RuntimeUnusable(bundle.binary.clone()),
            );
            return Err(self.fail(step, "runtime_install_failed", error));
        };
        self.emit(ProgressEvent::done(step, "runtime_ready"));
        Ok(Some(runtime))
    }

    fn ensure_node(&self, location: &InstallLocation) -> Result<(), PipelineError> {
        let step = ProgressStep::DownloadedCore;
        self.emit(ProgressEvent::active(step, 0, "checking_core"));
        if self.is_installed(location) {
            self.emit(ProgressEvent::done(step, "core_ready"));
            return Ok(());
        }

        match &self.profile.node {
            NodeDistribution::Archive {
                url,
                archive,
                extract_into,
            } => {
                let job = DownloadJob::single(url, archive);
                let archive = self
                    .download(ArtifactClass::Node, &job, step, "downloading_core")
                    .at(PipelineStep::InstallNode)
                    .map_err(|error| self.fail(step, "core_download_failed", error))?;
                self.emit(ProgressEvent::active(step, 100, "installing_core"));
                self.archives
                    .install(&archive, extract_into, location.dir())
                    .at(PipelineStep::InstallNode)
                    .map_err(|error| self.fail(step, "core_install_failed", error))?;
            }
            NodeDistribution::Installer { url, installer, .. } => {
                let job = DownloadJob::single(url, installer);
                let installer = self
                    .download(ArtifactClass::Installer, &job, step, "downloading_core")
                    .at(PipelineStep::InstallNode)
                    .map_err(|error| self.fail(step, "core_download_failed", error))?;
                self.emit(ProgressEvent::active(step, 100, "installing_core"));
                self.installers
                    .run(&installer)
                    .at(PipelineStep::InstallNode)
                    .map_err(|error| self.fail(step, "core_install_failed", error))?;
            }
        }

        if !self.is_installed(location) {
            let error = PipelineError::new(
                PipelineStep::InstallNode,
                StepError::NotInstalled(location.dir().to_path_buf()),
            );
            return Err(self.fail(step, "core_install_failed", error));
        }
        self.emit(ProgressEvent::done(step, "core_ready"));
        Ok(())
    }

    fn start_and_confirm(&self, location: &InstallLocation) -> Result<StartReport, PipelineError> {
        let step = ProgressStep::CoreRunning;
        self.emit(ProgressEvent::active(step, 0, "starting_core"));
        if self.is_running() {
            info!(target: MANAGER_TARGET, "node already running");
            self.emit(ProgressEvent::done(step, "core_already_running"));
            return Ok(StartReport::AlreadyRunning);
        }

        let session = self
            .watches
            .open(self.profile.log_path(location.dir()), self.clock.now());
        let launch = start_node(&self.profile, location.dir())
            .at(PipelineStep::StartNode)
            .map_err(|error| self.fail(step, "core_launch_failed", error))?;
        self.emit(ProgressEvent::active(step, 25, "core_launched"));
        self.confirm_startup(session)?;
        Ok(StartReport::Started(launch))
    }

    fn confirm_startup(&self, session: WatchSession<'_>) -> Result<StartupOutcome, PipelineError> {
        let step = ProgressStep::CoreRunning;
        let watch = StartupWatch::new(&*self.liveness, &self.admin, self.profile.process_label)
            .with_timings(self.timings.startup);
        let outcome = session.watch_for_api_start(&watch, &mut |percent| {
            self.emit(ProgressEvent::active(step, percent, "core_bootstrapping"));
        });
        if outcome.is_success() {
            self.emit(ProgressEvent::done(step, "core_started"));
            Ok(outcome)
        } else {
            warn!(target: MANAGER_TARGET, outcome = ?outcome, "node startup not confirmed");
            let error = PipelineError::new(PipelineStep::ConfirmStartup, StepError::Startup(outcome));
            Err(self.fail(step, "core_start_failed", error))
        }
    }

    fn download(
        &self,
        class: ArtifactClass,
        job: &DownloadJob,
        step: ProgressStep,
        code: &'static str,
    ) -> Result<PathBuf, StepError> {
        let mut last_percent = None;
        let mut on_progress = |progress: Progress| {
            if progress.percent.is_some() && progress.percent != last_percent {
                last_percent = progress.percent;
                self.emit(ProgressEvent::active(step, progress.percent.unwrap_or(0), code));
            }
        };
        match self.downloads.download(class, job, &mut on_progress)? {
            DownloadOutcome::Completed(path) => Ok(path),
            DownloadOutcome::AlreadyInFlight => Err(StepError::DownloadInFlight(class)),
        }
    }
}

fn parent_or_self(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| path.to_path_buf(), Path::to_path_buf)
}
