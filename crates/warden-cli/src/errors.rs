//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use warden_core::admin::AdminError;
use warden_core::fetch::FetchError;
use warden_core::{PipelineError, PlatformError};

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not determine the user home directory; set --home-dir")]
    HomeDirectory,
    #[error("could not determine the shared settings location; set --shared-settings-path")]
    SettingsPath,
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("invalid control API address: {0}")]
    Admin(#[from] AdminError),
    #[error("failed to prepare the downloader: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("repository deletion requires --yes")]
    DeletionNotConfirmed,
    #[error("failed to serialise report: {0}")]
    SerialiseReport(serde_json::Error),
    #[error("failed to write report: {0}")]
    WriteReport(io::Error),
}
