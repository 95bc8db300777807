//! Tests for the two-layer stop pipeline.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use httpmock::prelude::*;
use tempfile::TempDir;
use url::Url;

use super::{MockLivenessProbe, NodeStopper, StopMethod, StopOutcome, StopTimings};
use crate::admin::{API_KEY_FILE, AdminClient};
use crate::platform::{HostArch, HostDirs, HostOs, PlatformProfile, resolve};

const FAST: StopTimings = StopTimings {
    poll_interval: Duration::from_millis(10),
    attempts: 3,
    script_timeout: Duration::from_secs(5),
};

struct Install {
    temp: TempDir,
    profile: PlatformProfile,
    server: MockServer,
    admin: AdminClient,
}

impl Install {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let profile =
            resolve(HostOs::Linux, HostArch::X64, &HostDirs::under_home(temp.path())).expect("profile");
        fs::create_dir_all(&profile.default_install_dir).expect("install dir");
        let server = MockServer::start();
        let admin = AdminClient::new(Url::parse(&server.base_url()).expect("url")).expect("client");
        Self {
            temp,
            profile,
            server,
            admin,
        }
    }

    fn dir(&self) -> &std::path::Path {
        &self.profile.default_install_dir
    }

    fn write_stop_script(&self, body: &str) {
        fs::write(self.dir().join("stop.sh"), body).expect("write stop script");
    }

    fn serve_api_key(&self) {
        fs::write(self.dir().join(API_KEY_FILE), "node-key").expect("write key");
        self.server.mock(|when, then| {
            when.method(GET).path("/admin/settings");
            then.status(200).json_body(serde_json::json!({ "apiKeyPath": "" }));
        });
    }
}

/// Liveness that reports alive for the first `alive_calls` checks.
fn liveness_for(alive_calls: u32) -> (MockLivenessProbe, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut probe = MockLivenessProbe::new();
    probe
        .expect_is_alive()
        .returning(move |_| counter.fetch_add(1, Ordering::SeqCst) < alive_calls);
    (probe, calls)
}

#[test]
fn idle_node_is_reported_not_running() {
    let install = Install::new();
    install.write_stop_script("touch script-ran\n");
    let (probe, _) = liveness_for(0);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::NotRunning);
    assert!(!install.dir().join("script-ran").exists());
}

#[test]
fn script_success_requires_liveness_confirmation() {
    let install = Install::new();
    install.write_stop_script("touch script-ran\n");
    let (probe, _) = liveness_for(2);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::Stopped(StopMethod::Script));
    assert!(install.dir().join("script-ran").exists());
}

#[test]
fn clean_script_exit_without_confirmation_falls_back_to_api() {
    let install = Install::new();
    install.write_stop_script("exit 0\n");
    install.serve_api_key();
    let stop = install.server.mock(|when, then| {
        when.method(GET).path("/admin/stop").header("X-API-KEY", "node-key");
        then.status(200).body("true");
    });
    // Alive for the initial check and the whole script confirmation window.
    let (probe, _) = liveness_for(1 + FAST.attempts + 1);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::Stopped(StopMethod::Api));
    stop.assert();
}

#[test]
fn missing_script_goes_straight_to_api() {
    let install = Install::new();
    install.serve_api_key();
    let stop = install.server.mock(|when, then| {
        when.method(GET).path("/admin/stop");
        then.status(200);
    });
    let (probe, _) = liveness_for(1);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::Stopped(StopMethod::Api));
    stop.assert();
}

#[test]
fn unavailable_api_key_skips_the_stop_request() {
    let install = Install::new();
    install.server.mock(|when, then| {
        when.method(GET).path("/admin/settings");
        then.status(500);
    });
    let stop = install.server.mock(|when, then| {
        when.method(GET).path("/admin/stop");
        then.status(200);
    });
    let (probe, _) = liveness_for(u32::MAX);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::StillRunning);
    stop.assert_hits(0);
}

#[test]
fn node_that_never_exits_is_still_running() {
    let install = Install::new();
    install.write_stop_script("exit 1\n");
    install.serve_api_key();
    install.server.mock(|when, then| {
        when.method(GET).path("/admin/stop");
        then.status(500);
    });
    let (probe, calls) = liveness_for(u32::MAX);

    let outcome = NodeStopper::new(&install.profile, install.dir(), &probe, &install.admin)
        .with_timings(FAST)
        .stop();

    assert_eq!(outcome, StopOutcome::StillRunning);
    assert!(!outcome.is_stopped());
    // Both confirmation windows ran to completion and no more.
    assert_eq!(calls.load(Ordering::SeqCst), 1 + 2 * (FAST.attempts + 1));
    drop(install.temp);
}
