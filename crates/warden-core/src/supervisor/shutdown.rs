//! Two-layer node shutdown with independent confirmation.
//!
//! The stop script runs first where one exists; the control API stop is the
//! fallback. Either path only counts once liveness polling reports the node
//! gone.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use strum::Display;
use tracing::{info, warn};

use super::SUPERVISOR_TARGET;
use super::liveness::LivenessProbe;
use crate::admin::{AdminClient, ApiKeyStore};
use crate::platform::PlatformProfile;

/// Bounds for shutdown confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimings {
    /// Pause between liveness checks.
    pub poll_interval: Duration,
    /// Liveness checks per confirmation window.
    pub attempts: u32,
    /// Longest the stop script may run before it is killed.
    pub script_timeout: Duration,
}

impl Default for StopTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            attempts: 30,
            script_timeout: Duration::from_secs(60),
        }
    }
}

/// Which mechanism brought the node down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopMethod {
    /// The distribution's stop script.
    Script,
    /// The control API stop endpoint.
    Api,
}

/// Confirmed result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The node was not running to begin with.
    NotRunning,
    /// The node stopped and liveness confirmed it.
    Stopped(StopMethod),
    /// Every path was tried and the node is still alive.
    StillRunning,
}

impl StopOutcome {
    /// Whether the node is confirmed absent.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        !matches!(self, Self::StillRunning)
    }
}

/// Stops the node installed in one directory.
pub struct NodeStopper<'a> {
    profile: &'a PlatformProfile,
    install_dir: &'a Path,
    liveness: &'a dyn LivenessProbe,
    admin: &'a AdminClient,
    timings: StopTimings,
}

impl<'a> NodeStopper<'a> {
    /// Prepares a stopper with the default timings.
    #[must_use]
    pub fn new(
        profile: &'a PlatformProfile,
        install_dir: &'a Path,
        liveness: &'a dyn LivenessProbe,
        admin: &'a AdminClient,
    ) -> Self {
        Self {
            profile,
            install_dir,
            liveness,
            admin,
            timings: StopTimings::default(),
        }
    }

    /// Overrides the confirmation timings.
    #[must_use]
    pub const fn with_timings(mut self, timings: StopTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Stops the node, falling back from script to control API.
    pub fn stop(&self) -> StopOutcome {
        if !self.alive() {
            info!(target: SUPERVISOR_TARGET, "node not running; nothing to stop");
            return StopOutcome::NotRunning;
        }

        if let Some(script) = self
            .profile
            .stop_script(self.install_dir)
            .filter(|script| script.is_file())
        {
            match self.run_script(&script) {
                Ok(status) => info!(target: SUPERVISOR_TARGET, %status, "stop script finished"),
                Err(error) => warn!(target: SUPERVISOR_TARGET, error = %error, "stop script failed"),
            }
            if self.confirm_stopped() {
                return StopOutcome::Stopped(StopMethod::Script);
            }
            warn!(
                target: SUPERVISOR_TARGET,
                "node still alive after stop script; falling back to control API"
            );
        }

        self.request_api_stop();
        if self.confirm_stopped() {
            StopOutcome::Stopped(StopMethod::Api)
        } else {
            warn!(target: SUPERVISOR_TARGET, "node still alive after every stop attempt");
            StopOutcome::StillRunning
        }
    }

    /// Asks the control API to shut the node down; failures are logged and
    /// left to the liveness confirmation that follows.
    fn request_api_stop(&self) {
        let key = match ApiKeyStore::new(self.admin, self.install_dir).get_api_key() {
            Ok(key) => key,
            Err(error) => {
                warn!(target: SUPERVISOR_TARGET, error = %error, "no API key for control API stop");
                return;
            }
        };
        if let Err(error) = self.admin.stop(&key) {
            warn!(target: SUPERVISOR_TARGET, error = %error, "control API stop failed");
        }
    }

    fn alive(&self) -> bool {
        self.liveness.is_alive(self.profile.process_label)
    }

    /// Polls liveness until the node disappears or the attempts run out.
    fn confirm_stopped(&self) -> bool {
        for attempt in 0..self.timings.attempts {
            if !self.alive() {
                info!(target: SUPERVISOR_TARGET, attempt, "node shutdown confirmed");
                return true;
            }
            thread::sleep(self.timings.poll_interval);
        }
        !self.alive()
    }

    fn run_script(&self, script: &Path) -> std::io::Result<ExitStatus> {
        let mut child = Command::new("sh")
            .arg(script)
            .current_dir(self.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let deadline = Instant::now() + self.timings.script_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                child.kill()?;
                return child.wait();
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}
