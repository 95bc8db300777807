//! Independent liveness checks for the node process.
//!
//! Liveness is always re-derived from the outside: a loopback port probe
//! first, then the process table. Nothing here relies on a spawned handle.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use super::SUPERVISOR_TARGET;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(600);

/// Answers whether the node is currently running.
#[cfg_attr(test, mockall::automock)]
pub trait LivenessProbe: Send + Sync {
    /// Returns `true` when a process matching `label` appears alive.
    fn is_alive(&self, label: &str) -> bool;
}

/// Probes the loopback control port, then the OS process table.
#[derive(Debug, Clone, Copy)]
pub struct SystemLiveness {
    address: SocketAddr,
    connect_timeout: Duration,
}

impl SystemLiveness {
    /// Probes `127.0.0.1:port`.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
            connect_timeout: PORT_PROBE_TIMEOUT,
        }
    }

    /// Overrides the port probe timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether something accepts connections on the control port.
    #[must_use]
    pub fn port_open(&self) -> bool {
        match TcpStream::connect_timeout(&self.address, self.connect_timeout) {
            Ok(_) => true,
            Err(error) => {
                if !is_expected_probe_failure(&error) {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        address = %self.address,
                        error = %error,
                        "port probe failed"
                    );
                }
                false
            }
        }
    }
}

impl LivenessProbe for SystemLiveness {
    fn is_alive(&self, label: &str) -> bool {
        if self.port_open() {
            return true;
        }
        process_table_contains(label)
    }
}

fn is_expected_probe_failure(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut
    )
}

/// Scans the process table for `label` in a process name or argument,
/// skipping the calling process.
///
/// Threads are listed as separate entries on Linux and share their leader's
/// command line, so only thread-group leaders are considered.
#[must_use]
pub fn process_table_contains(label: &str) -> bool {
    let own_pid = sysinfo::get_current_pid().ok();
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
    );
    let found = system
        .processes()
        .iter()
        .filter(|(pid, process)| Some(**pid) != own_pid && process.thread_kind().is_none())
        .any(|(_, process)| process_matches(process, label));
    debug!(target: SUPERVISOR_TARGET, label, found, "process table scan");
    found
}

fn process_matches(process: &Process, label: &str) -> bool {
    let needle = label.to_lowercase();
    process.name().to_string_lossy().to_lowercase().contains(&needle)
        || process
            .cmd()
            .iter()
            .any(|argument| argument.to_string_lossy().to_lowercase().contains(&needle))
}
