//! Host platform resolution.
//!
//! Every supported (operating system, architecture) pair maps to exactly one
//! [`PlatformProfile`]. The profile is plain data: it is resolved once per
//! high-level operation and threaded through every other component, so no
//! other module branches on the host platform.

use std::path::{Path, PathBuf};

use strum::{Display, EnumString};
use thiserror::Error;

/// Primary mirror hosting the bundled Java runtime archives.
const RUNTIME_PRIMARY_BASE: &str = "https://download.qortal.online";
/// Backup mirror hosting the bundled Java runtime archives.
const RUNTIME_BACKUP_BASE: &str = "https://cloud.qortal.org/s";
/// Release archive containing the node jar and its support files.
const NODE_ARCHIVE_URL: &str = "https://github.com/qortal/qortal/releases/latest/download/qortal.zip";
/// Native installer used on Windows hosts.
const NODE_INSTALLER_URL: &str =
    "https://github.com/qortal/qortal/releases/latest/download/qortal.exe";
const RUNTIME_DIR_NAME: &str = "jdk-17.0.2";
const NODE_DIR_NAME: &str = "qortal";
const WINDOWS_PROGRAM_DIR: &str = r"C:\Program Files\Qortal";

/// Host operating systems the launcher supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HostOs {
    /// Linux distributions.
    Linux,
    /// macOS.
    Darwin,
    /// Microsoft Windows.
    Windows,
}

/// CPU architectures the launcher supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HostArch {
    /// 64-bit x86.
    X64,
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM.
    Arm64,
}

/// Errors raised while resolving the host platform.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The operating system reported by the toolchain is not supported.
    #[error("unsupported operating system '{0}'")]
    UnknownOs(String),
    /// The architecture reported by the toolchain is not supported.
    #[error("unsupported CPU architecture '{0}'")]
    UnknownArch(String),
    /// The combination exists but has no node distribution.
    #[error("no node distribution for {os}/{arch}")]
    Unsupported {
        /// Host operating system.
        os: HostOs,
        /// Host architecture.
        arch: HostArch,
    },
}

impl HostOs {
    /// Operating system the current binary was compiled for.
    pub fn current() -> Result<Self, PlatformError> {
        match std::env::consts::OS {
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::Darwin),
            "windows" => Ok(Self::Windows),
            other => Err(PlatformError::UnknownOs(other.to_owned())),
        }
    }
}

impl HostArch {
    /// Architecture the current binary was compiled for.
    pub fn current() -> Result<Self, PlatformError> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Self::X64),
            "arm" => Ok(Self::Arm),
            "aarch64" => Ok(Self::Arm64),
            other => Err(PlatformError::UnknownArch(other.to_owned())),
        }
    }
}

/// Directories on the host that platform layouts are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDirs {
    /// The user's home directory.
    pub home: PathBuf,
    /// Where downloaded installers are saved.
    pub downloads: PathBuf,
    /// Per-user local application data directory.
    pub local_data: PathBuf,
}

impl HostDirs {
    /// Derives every directory from a single home directory.
    #[must_use]
    pub fn under_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            downloads: home.join("Downloads"),
            local_data: home.join("AppData").join("Local"),
            home,
        }
    }

    /// Discovers directories from the current user environment.
    ///
    /// `home_override` replaces the detected home directory and every
    /// directory derived from it.
    #[must_use]
    pub fn discover(home_override: Option<&Path>) -> Option<Self> {
        if let Some(home) = home_override {
            return Some(Self::under_home(home));
        }
        let home = dirs::home_dir()?;
        let fallback = Self::under_home(&home);
        Some(Self {
            downloads: dirs::download_dir().unwrap_or(fallback.downloads),
            local_data: dirs::data_local_dir().unwrap_or(fallback.local_data),
            home,
        })
    }
}

/// A URL available from two mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPair {
    /// Preferred source.
    pub primary: String,
    /// Source used when the primary does not have the artifact.
    pub backup: String,
}

/// Bundled Java runtime for POSIX hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBundle {
    /// Directory the runtime archive expands into.
    pub root: PathBuf,
    /// Path to the `java` launcher inside [`Self::root`].
    pub binary: PathBuf,
    /// Where the runtime archive comes from.
    pub source: MirrorPair,
    /// Where the runtime archive is saved before extraction.
    pub archive: PathBuf,
}

/// How the node software reaches the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDistribution {
    /// A zip archive expanded into [`Self::Archive::extract_into`], producing
    /// the default install directory.
    Archive {
        /// Source of the archive.
        url: String,
        /// Where the archive is saved before extraction.
        archive: PathBuf,
        /// Directory the archive is expanded into.
        extract_into: PathBuf,
    },
    /// A native installer that places an executable under Program Files.
    Installer {
        /// Source of the installer.
        url: String,
        /// Where the installer is saved before running it.
        installer: PathBuf,
        /// Path of the installed node executable.
        executable: PathBuf,
    },
}

/// Paths and artifacts for one host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    /// Host operating system.
    pub os: HostOs,
    /// Host architecture.
    pub arch: HostArch,
    /// Bundled runtime, absent where the node ships as a native executable.
    pub runtime: Option<RuntimeBundle>,
    /// Node software distribution.
    pub node: NodeDistribution,
    /// Directory the node is installed into unless the user chose another.
    pub default_install_dir: PathBuf,
    /// Local application data directory, used for repository fallbacks.
    pub local_data_dir: PathBuf,
    /// Label matched against the process table to find the running node.
    pub process_label: &'static str,
}

/// Node jar inside an install directory.
pub const NODE_JAR: &str = "qortal.jar";
/// Node settings file inside an install directory.
pub const NODE_SETTINGS: &str = "settings.json";
/// Node log file inside an install directory.
pub const NODE_LOG: &str = "qortal.log";
/// Graceful stop script shipped with POSIX distributions.
pub const STOP_SCRIPT: &str = "stop.sh";
/// File receiving the node's console output.
pub const RUN_LOG: &str = "run.log";

/// Resolves the profile for a host.
///
/// # Errors
///
/// Returns [`PlatformError::Unsupported`] for pairs without a distribution
/// (for example 32-bit ARM macOS).
pub fn resolve(os: HostOs, arch: HostArch, dirs: &HostDirs) -> Result<PlatformProfile, PlatformError> {
    let unsupported = || PlatformError::Unsupported { os, arch };
    let runtime = match (os, arch) {
        (HostOs::Linux, HostArch::X64) => Some(runtime_bundle(
            dirs,
            "openjdk-17.0.2_linux-x64_bin.zip",
            "aSxDWTskG8kBR5T",
            BinLayout::Flat,
        )),
        (HostOs::Linux, HostArch::Arm) => Some(runtime_bundle(
            dirs,
            "openjdk-17.0.2_linux-arm_bin.zip",
            "DAMFBEri469R3dj",
            BinLayout::Flat,
        )),
        (HostOs::Linux, HostArch::Arm64) => Some(runtime_bundle(
            dirs,
            "openjdk-17.0.2_linux-arm64_bin.zip",
            "t7Kk9ZpEAroFmg2",
            BinLayout::Flat,
        )),
        (HostOs::Darwin, HostArch::X64) => Some(runtime_bundle(
            dirs,
            "openjdk-17.0.2_macos-x64_bin.zip",
            "7t9d6xPfk8tsDxB",
            BinLayout::MacBundle,
        )),
        (HostOs::Darwin, HostArch::Arm64) => Some(runtime_bundle(
            dirs,
            "openjdk-17.0.2_macos-aarch64_bin.zip",
            "GRE3CGqMospwtZP",
            BinLayout::MacBundle,
        )),
        (HostOs::Windows, HostArch::X64) => None,
        (HostOs::Darwin | HostOs::Windows, _) => return Err(unsupported()),
    };

    let (node, default_install_dir, process_label) = if runtime.is_some() {
        let node = NodeDistribution::Archive {
            url: NODE_ARCHIVE_URL.to_owned(),
            archive: dirs.home.join("qortal.zip"),
            extract_into: dirs.home.clone(),
        };
        (node, dirs.home.join(NODE_DIR_NAME), NODE_JAR)
    } else {
        let node = NodeDistribution::Installer {
            url: NODE_INSTALLER_URL.to_owned(),
            installer: dirs.downloads.join("qortal.exe"),
            executable: Path::new(WINDOWS_PROGRAM_DIR).join("qortal.exe"),
        };
        (node, PathBuf::from(WINDOWS_PROGRAM_DIR), "qortal.exe")
    };
    Ok(PlatformProfile {
        os,
        arch,
        runtime,
        node,
        default_install_dir,
        local_data_dir: dirs.local_data.clone(),
        process_label,
    })
}

/// Resolves the profile for the host this binary runs on.
///
/// # Errors
///
/// Fails when the host operating system or architecture is unsupported.
pub fn resolve_current(dirs: &HostDirs) -> Result<PlatformProfile, PlatformError> {
    resolve(HostOs::current()?, HostArch::current()?, dirs)
}

#[derive(Clone, Copy)]
enum BinLayout {
    Flat,
    MacBundle,
}

fn runtime_bundle(dirs: &HostDirs, archive_name: &str, share: &str, layout: BinLayout) -> RuntimeBundle {
    let root = dirs.home.join(RUNTIME_DIR_NAME);
    let bin_dir = match layout {
        BinLayout::Flat => root.join("bin"),
        BinLayout::MacBundle => root.join("Contents").join("Home").join("bin"),
    };
    RuntimeBundle {
        binary: bin_dir.join("java"),
        source: MirrorPair {
            primary: format!("{RUNTIME_PRIMARY_BASE}/{archive_name}"),
            backup: format!("{RUNTIME_BACKUP_BASE}/{share}/download/{archive_name}"),
        },
        archive: dirs.home.join(archive_name),
        root,
    }
}

impl PlatformProfile {
    /// Whether the node runs as a jar on a Java runtime.
    #[must_use]
    pub const fn uses_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// The node jar inside an install directory.
    #[must_use]
    pub fn jar_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(NODE_JAR)
    }

    /// The node settings file inside an install directory.
    #[must_use]
    pub fn settings_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(NODE_SETTINGS)
    }

    /// The node log file inside an install directory.
    #[must_use]
    pub fn log_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(NODE_LOG)
    }

    /// The graceful stop script, present only on archive installs.
    #[must_use]
    pub fn stop_script(&self, install_dir: &Path) -> Option<PathBuf> {
        matches!(self.node, NodeDistribution::Archive { .. }).then(|| install_dir.join(STOP_SCRIPT))
    }

    /// Bundled runtime binary when it exists on disk.
    #[must_use]
    pub fn installed_runtime(&self) -> Option<&Path> {
        self.runtime
            .as_ref()
            .map(|bundle| bundle.binary.as_path())
            .filter(|binary| binary.exists())
    }
}
