//! JSON lines output.
//!
//! Progress events stream to stdout as they happen, one JSON object per line.
//! Each command finishes with a single report line of the form
//! `{"command": "...", "result": {...}}`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::warn;
use warden_core::{ProgressEvent, ProgressSink};

use crate::AppError;

const OUTPUT_TARGET: &str = "warden::output";

/// Writes progress events as JSON lines.
#[derive(Debug)]
pub struct JsonLinesProgress<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesProgress<W> {
    /// Writes events to `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ProgressSink for JsonLinesProgress<W> {
    fn emit(&self, event: &ProgressEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = write_line(&mut *writer, event) {
            warn!(target: OUTPUT_TARGET, error = %error, "dropped progress event");
        }
    }
}

/// Final output of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "result", rename_all = "kebab-case")]
pub(crate) enum Report {
    Status(StatusReport),
    Install(InstallReport),
    Start(StartView),
    Stop(StopReport),
    Bootstrap(BootstrapReport),
    ApiKey(ApiKeyReport),
    RepositoryPath(PathReport),
    RepositoryDelete(PathReport),
    CustomDir(CustomDirReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusReport {
    pub(crate) location: PathBuf,
    pub(crate) custom_location: bool,
    pub(crate) runtime_required: bool,
    pub(crate) runtime: Option<RuntimeView>,
    pub(crate) installed: bool,
    pub(crate) running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RuntimeView {
    pub(crate) binary: PathBuf,
    pub(crate) version: String,
    pub(crate) bundled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstallReport {
    pub(crate) location: PathBuf,
    pub(crate) runtime: Option<RuntimeView>,
    pub(crate) start: StartView,
}

/// How the node was brought up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartView {
    pub(crate) already_running: bool,
    pub(crate) pid: Option<u32>,
    pub(crate) bundled_runtime: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopReport {
    /// `not_running`, `script` or `api`.
    pub(crate) outcome: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BootstrapReport {
    /// `api_started` or `restart_grace`.
    pub(crate) completion: &'static str,
    pub(crate) startup_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiKeyReport {
    pub(crate) api_key: String,
    pub(crate) regenerated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct PathReport {
    pub(crate) path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomDirReport {
    pub(crate) custom_dir: Option<PathBuf>,
}

/// Writes the final report line.
pub(crate) fn write_report<W: Write>(writer: &mut W, report: &Report) -> Result<(), AppError> {
    serde_json::to_writer(&mut *writer, report).map_err(AppError::SerialiseReport)?;
    writer.write_all(b"\n").map_err(AppError::WriteReport)?;
    writer.flush().map_err(AppError::WriteReport)
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
