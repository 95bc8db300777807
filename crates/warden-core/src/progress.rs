//! Progress events surfaced to whatever drives the lifecycle operations.

use std::sync::Arc;

use serde::Serialize;
use strum::Display;

const PROGRESS_TARGET: &str = "warden::progress";

/// Milestones a caller can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ProgressStep {
    /// A runtime able to launch the node is available.
    HasJava,
    /// The node software is installed.
    DownloadedCore,
    /// The node process is up and its API answers.
    CoreRunning,
    /// A repository bootstrap is underway.
    Bootstrap,
}

/// State of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStatus {
    /// The step is running.
    Active,
    /// The step finished.
    Done,
    /// The step failed.
    Error,
    /// Not applicable on this host.
    Off,
}

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Pipeline step reporting.
    pub step: ProgressStep,
    /// State of that step.
    pub status: ProgressStatus,
    /// Percent complete, `0..=100`.
    pub progress: u8,
    /// Stable identifier a front end can translate.
    pub message_code: &'static str,
}

impl ProgressEvent {
    /// A step in progress.
    #[must_use]
    pub fn active(step: ProgressStep, progress: u8, message_code: &'static str) -> Self {
        Self {
            step,
            status: ProgressStatus::Active,
            progress: progress.min(100),
            message_code,
        }
    }

    /// A finished step.
    #[must_use]
    pub const fn done(step: ProgressStep, message_code: &'static str) -> Self {
        Self {
            step,
            status: ProgressStatus::Done,
            progress: 100,
            message_code,
        }
    }

    /// A failed step.
    #[must_use]
    pub const fn error(step: ProgressStep, message_code: &'static str) -> Self {
        Self {
            step,
            status: ProgressStatus::Error,
            progress: 0,
            message_code,
        }
    }

    /// A step that does not apply.
    #[must_use]
    pub const fn off(step: ProgressStep, message_code: &'static str) -> Self {
        Self {
            step,
            status: ProgressStatus::Off,
            progress: 0,
            message_code,
        }
    }
}

/// Observer receiving progress events.
pub trait ProgressSink: Send + Sync {
    /// Invoked for every event, in emission order.
    fn emit(&self, event: &ProgressEvent);
}

impl<T> ProgressSink for Arc<T>
where
    T: ProgressSink + ?Sized,
{
    fn emit(&self, event: &ProgressEvent) {
        (**self).emit(event);
    }
}

/// Default sink that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredProgressReporter;

impl StructuredProgressReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProgressSink for StructuredProgressReporter {
    fn emit(&self, event: &ProgressEvent) {
        match event.status {
            ProgressStatus::Error => tracing::error!(
                target: PROGRESS_TARGET,
                event = event.message_code,
                step = %event.step,
                "step failed"
            ),
            status => tracing::info!(
                target: PROGRESS_TARGET,
                event = event.message_code,
                step = %event.step,
                status = %status,
                progress = event.progress,
                "progress"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{ProgressEvent, ProgressSink, ProgressStatus, ProgressStep};

    /// Sink that keeps every event for later assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingProgress {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingProgress {
        pub(crate) fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().expect("events lock").clone()
        }

        pub(crate) fn statuses(&self, step: ProgressStep) -> Vec<ProgressStatus> {
            self.events()
                .into_iter()
                .filter(|event| event.step == step)
                .map(|event| event.status)
                .collect()
        }

        pub(crate) fn codes(&self) -> Vec<&'static str> {
            self.events().into_iter().map(|event| event.message_code).collect()
        }
    }

    impl ProgressSink for RecordingProgress {
        fn emit(&self, event: &ProgressEvent) {
            self.events.lock().expect("events lock").push(*event);
        }
    }
}
