//! Java runtime detection.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::SUPERVISOR_TARGET;
use crate::platform::PlatformProfile;

static VERSION_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?:java|openjdk) version\s+"([^"]+)""#).ok());

/// A runtime able to launch the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    /// Binary that answered the version query.
    pub binary: PathBuf,
    /// Reported version string.
    pub version: String,
    /// Whether the binary is the bundled runtime.
    pub bundled: bool,
}

/// Looks for the bundled runtime first, then `java` on `PATH`.
#[must_use]
pub fn detect_runtime(profile: &PlatformProfile) -> Option<RuntimeInfo> {
    if let Some(bundled) = profile.installed_runtime() {
        if let Some(version) = query_version(bundled) {
            return Some(RuntimeInfo {
                binary: bundled.to_path_buf(),
                version,
                bundled: true,
            });
        }
    }
    let system = Path::new("java");
    query_version(system).map(|version| RuntimeInfo {
        binary: system.to_path_buf(),
        version,
        bundled: false,
    })
}

fn query_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .inspect_err(|error| {
            debug!(
                target: SUPERVISOR_TARGET,
                binary = %binary.display(),
                error = %error,
                "runtime not executable"
            );
        })
        .ok()?;
    let version = parse_version(&String::from_utf8_lossy(&output.stderr));
    debug!(target: SUPERVISOR_TARGET, binary = %binary.display(), version = ?version, "runtime probed");
    version
}

/// Extracts the version from the first line of `java -version` output.
#[must_use]
pub fn parse_version(output: &str) -> Option<String> {
    let first_line = output.lines().next()?;
    VERSION_LINE
        .as_ref()?
        .captures(first_line)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str().to_owned())
}
