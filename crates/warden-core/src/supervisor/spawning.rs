//! Detached node launch.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::info;

use super::{SUPERVISOR_TARGET, SupervisorError};
use crate::platform::{NODE_JAR, NODE_SETTINGS, NodeDistribution, PlatformProfile, RUN_LOG};

/// JVM tuning flags passed ahead of `-jar`.
pub const JVM_FLAGS: &[&str] = &[
    "-Djava.net.preferIPv4Stack=false",
    "-Xss256m",
    "-XX:+UseSerialGC",
];
const NICE_LEVEL: &str = "20";

/// Details of a launch; the process itself is not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// Program that was executed.
    pub program: OsString,
    /// Operating system process id at spawn time.
    pub pid: u32,
    /// Whether the bundled runtime was used.
    pub bundled_runtime: bool,
}

/// Builds the launch command for an install directory.
///
/// Jar distributions run under `nohup nice` with the bundled runtime when
/// it is present, falling back to `java` on `PATH`. Installer distributions
/// run the installed executable directly.
#[must_use]
pub fn launch_command(profile: &PlatformProfile, install_dir: &Path) -> (Command, bool) {
    match &profile.node {
        NodeDistribution::Archive { .. } => {
            let bundled = profile.installed_runtime();
            let runtime = bundled.map_or_else(|| PathBuf::from("java"), Path::to_path_buf);
            let mut command = Command::new("nohup");
            command
                .args(["nice", "-n", NICE_LEVEL])
                .arg(runtime)
                .args(JVM_FLAGS)
                .args(["-jar", NODE_JAR, NODE_SETTINGS])
                .current_dir(install_dir);
            (command, bundled.is_some())
        }
        NodeDistribution::Installer { executable, .. } => {
            let mut command = Command::new(executable);
            command.current_dir(install_dir);
            (command, false)
        }
    }
}

/// Starts the node detached from the launcher.
///
/// Jar distributions append console output to `run.log` in the install
/// directory. The installed executable keeps its own logs and its install
/// directory may not be writable, so its console output is discarded. The
/// child handle is dropped immediately; liveness must be checked separately.
pub fn start_node(profile: &PlatformProfile, install_dir: &Path) -> Result<LaunchReport, SupervisorError> {
    let (mut command, bundled_runtime) = launch_command(profile, install_dir);
    let (stdout, stderr) = match run_log_path(profile, install_dir) {
        Some(run_log) => console_to(&run_log)?,
        None => (Stdio::null(), Stdio::null()),
    };
    command.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    detach(&mut command);

    let program = command.get_program().to_os_string();
    let child = command.spawn().map_err(|source| SupervisorError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    info!(
        target: SUPERVISOR_TARGET,
        program = ?program,
        pid,
        bundled_runtime,
        install_dir = %install_dir.display(),
        "node launched"
    );
    Ok(LaunchReport {
        program,
        pid,
        bundled_runtime,
    })
}

/// Where console output of a launch is appended, if anywhere.
#[must_use]
pub fn run_log_path(profile: &PlatformProfile, install_dir: &Path) -> Option<PathBuf> {
    match profile.node {
        NodeDistribution::Archive { .. } => Some(install_dir.join(RUN_LOG)),
        NodeDistribution::Installer { .. } => None,
    }
}

fn console_to(run_log: &Path) -> Result<(Stdio, Stdio), SupervisorError> {
    let stdout = open_run_log(run_log)?;
    let stderr = stdout.try_clone().map_err(|source| SupervisorError::RunLog {
        path: run_log.to_path_buf(),
        source,
    })?;
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}

fn open_run_log(path: &Path) -> Result<File, SupervisorError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SupervisorError::RunLog {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
