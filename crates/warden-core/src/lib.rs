//! Lifecycle management for a locally installed Qortal node.
//!
//! The node is an opaque external process. Everything here works from the
//! outside, through four indirect signals: the node's timestamped log file,
//! its loopback control port, the operating system process table, and a
//! small HTTP control API.
//!
//! [`NodeManager`] is the entry point. It resolves a [`PlatformProfile`]
//! once, then drives the components through three pipelines:
//!
//! 1. **Install**: ensure a Java runtime, download and extract the node,
//!    launch it detached and confirm startup from its log.
//! 2. **Stop**: run the distribution's stop script or call the control API,
//!    then poll liveness until the process is gone.
//! 3. **Bootstrap**: ask the node to rebuild its repository, follow the
//!    bootstrap through the log, then confirm the node is serving again.
//!
//! Every wait is bounded. Downloads are limited to one per artifact class and
//! log watches to one per log file; see [`fetch::DownloadManager`] and
//! [`watch::WatchRegistry`].

pub mod admin;
pub mod fetch;
pub mod install;
pub mod location;
mod manager;
pub mod platform;
pub mod progress;
pub mod repository;
pub mod supervisor;
pub mod watch;

pub use manager::{
    BootstrapSummary, InstallSummary, ManagerTimings, NodeManager, NodeStatus, PipelineError,
    PipelineStep, StartReport, StepError,
};
pub use platform::{HostDirs, PlatformError, PlatformProfile};
pub use progress::{ProgressEvent, ProgressSink, ProgressStatus, ProgressStep, StructuredProgressReporter};
