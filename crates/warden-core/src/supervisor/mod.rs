//! Node process supervision: launch, liveness and shutdown.

mod liveness;
mod runtime;
mod shutdown;
mod spawning;

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[cfg(test)]
pub(crate) use liveness::MockLivenessProbe;
pub use liveness::{LivenessProbe, SystemLiveness, process_table_contains};
pub use runtime::{RuntimeInfo, detect_runtime, parse_version};
pub use shutdown::{NodeStopper, StopMethod, StopOutcome, StopTimings};
pub use spawning::{JVM_FLAGS, LaunchReport, launch_command, run_log_path, start_node};

const SUPERVISOR_TARGET: &str = "warden::supervisor";

/// Errors raised while launching the node.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The console log could not be opened.
    #[error("failed to open run log {path:?}: {source}")]
    RunLog {
        /// Log path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// The node process could not be spawned.
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: OsString,
        /// I/O error.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod shutdown_tests;
