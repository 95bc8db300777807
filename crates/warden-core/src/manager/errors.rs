//! Step-tagged failures for lifecycle pipelines.

use std::path::PathBuf;

use strum::Display;
use thiserror::Error;

use crate::admin::{AdminError, ApiKeyError};
use crate::fetch::{ArtifactClass, FetchError};
use crate::install::InstallError;
use crate::location::SettingsError;
use crate::repository::RepositoryError;
use crate::supervisor::SupervisorError;
use crate::watch::{BootstrapOutcome, StartupOutcome};

/// Ordered steps of the lifecycle pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStep {
    /// Resolving the install directory.
    ResolveLocation,
    /// Downloading and installing the Java runtime.
    InstallRuntime,
    /// Downloading and installing the node software.
    InstallNode,
    /// Launching the node process.
    StartNode,
    /// Watching the node come up.
    ConfirmStartup,
    /// Stopping the node process.
    StopNode,
    /// Asking the node to bootstrap.
    TriggerBootstrap,
    /// Following the bootstrap in the node log.
    WatchBootstrap,
    /// Reading or rotating the API key.
    ManageApiKey,
    /// Resolving or clearing the repository.
    ManageRepository,
}

/// Cause of a failed step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Settings file failure.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// Download failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Extraction or installer failure.
    #[error(transparent)]
    Install(#[from] InstallError),
    /// Process launch or runtime failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// Control API failure.
    #[error(transparent)]
    Admin(#[from] AdminError),
    /// API key lookup or rotation failure.
    #[error(transparent)]
    ApiKey(#[from] ApiKeyError),
    /// Repository lookup or removal failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Another caller is already downloading this artifact.
    #[error("a {0} download is already in progress")]
    DownloadInFlight(ArtifactClass),
    /// The runtime was installed but does not answer a version query.
    #[error("runtime at {0:?} is not usable")]
    RuntimeUnusable(PathBuf),
    /// The node software is absent from the install directory.
    #[error("node is not installed in {0:?}")]
    NotInstalled(PathBuf),
    /// The startup watch resolved without the node coming up.
    #[error("node did not start: {0:?}")]
    Startup(StartupOutcome),
    /// The bootstrap watch resolved without success.
    #[error("bootstrap did not complete: {0:?}")]
    Bootstrap(BootstrapOutcome),
    /// Every stop path was tried and the node is still alive.
    #[error("node is still running after every stop attempt")]
    StillRunning,
}

/// A pipeline failure tagged with the step that raised it.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct PipelineError {
    /// Step that failed.
    pub step: PipelineStep,
    /// Underlying cause.
    #[source]
    pub source: StepError,
}

impl PipelineError {
    /// Tags `source` with `step`.
    pub fn new(step: PipelineStep, source: impl Into<StepError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// Attaches a step to fallible results.
pub(crate) trait AtStep<T> {
    fn at(self, step: PipelineStep) -> Result<T, PipelineError>;
}

impl<T, E> AtStep<T> for Result<T, E>
where
    E: Into<StepError>,
{
    fn at(self, step: PipelineStep) -> Result<T, PipelineError> {
        self.map_err(|error| PipelineError::new(step, error))
    }
}
