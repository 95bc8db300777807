//! Maps subcommands onto node manager operations.

use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::info;
use warden_config::Config;
use warden_core::admin::AdminClient;
use warden_core::location::SharedSettings;
use warden_core::platform::resolve_current;
use warden_core::supervisor::{RuntimeInfo, StopMethod, StopOutcome, SystemLiveness};
use warden_core::watch::{BootstrapOutcome, BootstrapSuccess};
use warden_core::{BootstrapSummary, HostDirs, NodeManager, NodeStatus, ProgressSink, StartReport};

use crate::AppError;
use crate::cli::{Command, CustomDirAction, RepositoryAction};
use crate::output::{
    ApiKeyReport, BootstrapReport, CustomDirReport, InstallReport, PathReport, Report, RuntimeView, StartView,
    StatusReport, StopReport,
};

const CLI_TARGET: &str = "warden::cli";

/// Builds a node manager for the configured host.
pub(crate) fn build_manager(config: &Config, progress: Arc<dyn ProgressSink>) -> Result<NodeManager, AppError> {
    let dirs = HostDirs::discover(config.home_dir().map(Utf8Path::as_std_path)).ok_or(AppError::HomeDirectory)?;
    let profile = resolve_current(&dirs)?;
    let settings_path = config
        .shared_settings_path()
        .map(|path| path.as_std_path().to_path_buf())
        .or_else(SharedSettings::default_path)
        .ok_or(AppError::SettingsPath)?;
    let admin = AdminClient::loopback(config.api_port())?;
    let liveness = SystemLiveness::new(config.api_port());
    info!(
        target: CLI_TARGET,
        os = ?profile.os,
        arch = ?profile.arch,
        settings = %settings_path.display(),
        "node manager ready"
    );
    let manager = NodeManager::new(profile, SharedSettings::new(settings_path), admin, Box::new(liveness))?;
    Ok(manager.with_progress(progress))
}

/// Runs one subcommand to completion.
pub(crate) fn execute(command: &Command, manager: &NodeManager) -> Result<Report, AppError> {
    let report = match command {
        Command::Status => Report::Status(status_report(manager.status()?)),
        Command::Install => {
            let summary = manager.install()?;
            Report::Install(InstallReport {
                location: summary.location.dir().to_path_buf(),
                runtime: summary.runtime.map(runtime_view),
                start: start_view(&summary.start),
            })
        }
        Command::Start => Report::Start(start_view(&manager.start()?)),
        Command::Stop => Report::Stop(StopReport {
            outcome: stop_label(manager.stop()?),
        }),
        Command::Bootstrap => Report::Bootstrap(bootstrap_report(manager.bootstrap()?)),
        Command::ApiKey { reset } => {
            let api_key = if *reset {
                manager.reset_api_key()?
            } else {
                manager.api_key()?
            };
            Report::ApiKey(ApiKeyReport {
                api_key,
                regenerated: *reset,
            })
        }
        Command::Repository { action } => repository(action, manager)?,
        Command::CustomDir { action } => Report::CustomDir(custom_dir(action, manager)?),
    };
    Ok(report)
}

fn repository(action: &RepositoryAction, manager: &NodeManager) -> Result<Report, AppError> {
    match action {
        RepositoryAction::Path => Ok(Report::RepositoryPath(PathReport {
            path: manager.repository_path()?,
        })),
        RepositoryAction::Delete { yes: false } => Err(AppError::DeletionNotConfirmed),
        RepositoryAction::Delete { yes: true } => Ok(Report::RepositoryDelete(PathReport {
            path: manager.delete_repository()?,
        })),
    }
}

fn custom_dir(action: &CustomDirAction, manager: &NodeManager) -> Result<CustomDirReport, AppError> {
    let custom_dir: Option<PathBuf> = match action {
        CustomDirAction::Set { dir } => {
            manager.set_custom_install_dir(dir)?;
            Some(dir.clone())
        }
        CustomDirAction::Clear => {
            manager.clear_custom_install_dir()?;
            None
        }
    };
    Ok(CustomDirReport { custom_dir })
}

pub(crate) fn status_report(status: NodeStatus) -> StatusReport {
    StatusReport {
        location: status.location.dir().to_path_buf(),
        custom_location: status.location.is_custom(),
        runtime_required: status.runtime_required,
        runtime: status.runtime.map(runtime_view),
        installed: status.installed,
        running: status.running,
    }
}

fn runtime_view(runtime: RuntimeInfo) -> RuntimeView {
    RuntimeView {
        binary: runtime.binary,
        version: runtime.version,
        bundled: runtime.bundled,
    }
}

pub(crate) const fn start_view(report: &StartReport) -> StartView {
    match report {
        StartReport::AlreadyRunning => StartView {
            already_running: true,
            pid: None,
            bundled_runtime: None,
        },
        StartReport::Started(launch) => StartView {
            already_running: false,
            pid: Some(launch.pid),
            bundled_runtime: Some(launch.bundled_runtime),
        },
    }
}

pub(crate) const fn stop_label(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::NotRunning => "not_running",
        StopOutcome::Stopped(StopMethod::Script) => "script",
        StopOutcome::Stopped(StopMethod::Api) => "api",
        StopOutcome::StillRunning => "still_running",
    }
}

pub(crate) fn bootstrap_report(summary: BootstrapSummary) -> BootstrapReport {
    let completion = match summary.bootstrap {
        BootstrapOutcome::Completed(BootstrapSuccess::RestartGrace) => "restart_grace",
        _ => "api_started",
    };
    BootstrapReport {
        completion,
        startup_confirmed: summary.startup.is_none_or(|startup| startup.is_success()),
    }
}
