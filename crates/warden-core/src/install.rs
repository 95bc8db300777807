//! Archive extraction into install directories.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

const INSTALL_TARGET: &str = "warden::install";

/// Fatal installation failures.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The archive could not be opened.
    #[error("failed to open archive {path:?}: {source}")]
    Open {
        /// Archive path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// The archive could not be expanded.
    #[error("failed to extract {archive:?} into {target:?}: {source}")]
    Extraction {
        /// Archive path.
        archive: PathBuf,
        /// Extraction destination.
        target: PathBuf,
        /// Archive error.
        #[source]
        source: ZipError,
    },
    /// Extraction finished but the expected directory is absent.
    #[error("extraction did not produce directory {0:?}")]
    Verification(PathBuf),
    /// A native installer could not be launched.
    #[error("failed to run installer {path:?}: {source}")]
    InstallerSpawn {
        /// Installer path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// A native installer reported failure.
    #[error("installer {path:?} exited with {status}")]
    InstallerExit {
        /// Installer path.
        path: PathBuf,
        /// Exit status.
        status: ExitStatus,
    },
}

/// Non-fatal problems encountered after a successful extraction.
#[derive(Debug, Error)]
pub enum InstallWarning {
    /// Executable bits could not be applied.
    #[error("failed to mark {path:?} executable: {source}")]
    Permission {
        /// Entry that failed.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// The source archive could not be removed.
    #[error("failed to delete archive {path:?}: {source}")]
    Cleanup {
        /// Archive path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
}

/// Outcome of a successful installation.
#[derive(Debug)]
pub struct InstallReport {
    /// The verified installed directory.
    pub installed_dir: PathBuf,
    /// Problems that were logged and skipped.
    pub warnings: Vec<InstallWarning>,
}

/// Extracts archives, verifies the layout, marks files executable and
/// removes the archive.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveInstaller;

impl ArchiveInstaller {
    /// Installs `archive` into `target_dir`, expecting `expected_dir` to exist
    /// afterwards.
    pub fn install(
        &self,
        archive: &Path,
        target_dir: &Path,
        expected_dir: &Path,
    ) -> Result<InstallReport, InstallError> {
        extract(archive, target_dir)?;
        if !expected_dir.is_dir() {
            return Err(InstallError::Verification(expected_dir.to_path_buf()));
        }

        let mut warnings = Vec::new();
        if let Err(warning) = mark_executable(expected_dir) {
            warnings.push(warning);
        }
        if let Err(source) = fs::remove_file(archive) {
            warnings.push(InstallWarning::Cleanup {
                path: archive.to_path_buf(),
                source,
            });
        }
        for warning in &warnings {
            warn!(target: INSTALL_TARGET, warning = %warning, "install step skipped");
        }

        info!(
            target: INSTALL_TARGET,
            archive = %archive.display(),
            installed = %expected_dir.display(),
            "archive installed"
        );
        Ok(InstallReport {
            installed_dir: expected_dir.to_path_buf(),
            warnings,
        })
    }
}

/// Runs a downloaded native installer to completion.
///
/// `.msi` packages go through `msiexec` quietly; other installers run as
/// they are. The installer file is removed afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeInstaller;

impl NativeInstaller {
    /// Command that installs `installer`.
    #[must_use]
    pub fn command(&self, installer: &Path) -> Command {
        let is_msi = installer
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("msi"));
        if !is_msi {
            return Command::new(installer);
        }
        let system_root = std::env::var_os("SystemRoot").map_or_else(|| PathBuf::from(r"C:\Windows"), PathBuf::from);
        let mut command = Command::new(system_root.join("System32").join("msiexec.exe"));
        command.arg("/i").arg(installer).args(["/quiet", "/norestart"]);
        command
    }

    /// Runs `installer` and waits for it to exit.
    pub fn run(&self, installer: &Path) -> Result<Vec<InstallWarning>, InstallError> {
        let status = self
            .command(installer)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| InstallError::InstallerSpawn {
                path: installer.to_path_buf(),
                source,
            })?;
        if !status.success() {
            return Err(InstallError::InstallerExit {
                path: installer.to_path_buf(),
                status,
            });
        }
        info!(target: INSTALL_TARGET, installer = %installer.display(), "native installer finished");

        let mut warnings = Vec::new();
        if let Err(source) = fs::remove_file(installer) {
            let warning = InstallWarning::Cleanup {
                path: installer.to_path_buf(),
                source,
            };
            warn!(target: INSTALL_TARGET, warning = %warning, "install step skipped");
            warnings.push(warning);
        }
        Ok(warnings)
    }
}

fn extract(archive: &Path, target_dir: &Path) -> Result<(), InstallError> {
    let file = File::open(archive).map_err(|source| InstallError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    let extraction_error = |source| InstallError::Extraction {
        archive: archive.to_path_buf(),
        target: target_dir.to_path_buf(),
        source,
    };
    let mut zip = ZipArchive::new(file).map_err(extraction_error)?;
    zip.extract(target_dir).map_err(extraction_error)
}

#[cfg(unix)]
fn mark_executable(root: &Path) -> Result<(), InstallWarning> {
    use std::os::unix::fs::PermissionsExt;

    for walked in walkdir::WalkDir::new(root) {
        let entry = walked.map_err(|error| InstallWarning::Permission {
            path: error.path().unwrap_or(root).to_path_buf(),
            source: io::Error::from(error),
        })?;
        if entry.path_is_symlink() {
            continue;
        }
        let permission_error = |source| InstallWarning::Permission {
            path: entry.path().to_path_buf(),
            source,
        };
        let mut permissions = entry.metadata().map_err(|error| permission_error(io::Error::from(error)))?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(entry.path(), permissions).map_err(permission_error)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_root: &Path) -> Result<(), InstallWarning> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(body.as_bytes()).expect("write entry");
        }
        writer.finish().expect("finish archive");
    }

    #[test]
    fn installs_and_removes_archive() {
        let temp = TempDir::new().expect("temp dir");
        let archive = temp.path().join("qortal.zip");
        write_archive(
            &archive,
            &[("qortal/qortal.jar", "jar"), ("qortal/stop.sh", "#!/bin/sh\n")],
        );

        let report = ArchiveInstaller
            .install(&archive, temp.path(), &temp.path().join("qortal"))
            .expect("install succeeds");

        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(temp.path().join("qortal/qortal.jar").is_file());
        assert!(!archive.exists());
    }

    #[cfg(unix)]
    #[test]
    fn extracted_files_become_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("temp dir");
        let archive = temp.path().join("jdk.zip");
        write_archive(&archive, &[("jdk/bin/java", "binary")]);

        ArchiveInstaller
            .install(&archive, temp.path(), &temp.path().join("jdk"))
            .expect("install succeeds");

        let mode = fs::metadata(temp.path().join("jdk/bin/java"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn missing_expected_directory_fails_verification() {
        let temp = TempDir::new().expect("temp dir");
        let archive = temp.path().join("odd.zip");
        write_archive(&archive, &[("other/file.txt", "x")]);

        let result = ArchiveInstaller.install(&archive, temp.path(), &temp.path().join("qortal"));
        assert!(matches!(result, Err(InstallError::Verification(_))));
    }

    #[test]
    fn corrupt_archive_is_an_extraction_failure() {
        let temp = TempDir::new().expect("temp dir");
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, b"not a zip").expect("write");

        let result = ArchiveInstaller.install(&archive, temp.path(), temp.path());
        assert!(matches!(result, Err(InstallError::Extraction { .. })));
    }

    #[test]
    fn msi_packages_install_through_msiexec() {
        let command = NativeInstaller.command(Path::new("qortal.MSI"));
        assert!(command.get_program().to_string_lossy().ends_with("msiexec.exe"));
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["/i", "qortal.MSI", "/quiet", "/norestart"]);
    }

    #[test]
    fn executables_run_directly() {
        let command = NativeInstaller.command(Path::new("qortal.exe"));
        assert_eq!(command.get_program(), "qortal.exe");
        assert_eq!(command.get_args().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn failing_installer_keeps_its_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("temp dir");
        let installer = temp.path().join("setup");
        fs::write(&installer, "#!/bin/sh\nexit 3\n").expect("write installer");
        fs::set_permissions(&installer, fs::Permissions::from_mode(0o755)).expect("chmod");

        let result = NativeInstaller.run(&installer);

        assert!(matches!(result, Err(InstallError::InstallerExit { .. })));
        assert!(installer.exists());
    }

    #[cfg(unix)]
    #[test]
    fn successful_installer_is_removed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("temp dir");
        let installer = temp.path().join("setup");
        fs::write(&installer, "#!/bin/sh\nexit 0\n").expect("write installer");
        fs::set_permissions(&installer, fs::Permissions::from_mode(0o755)).expect("chmod");

        let warnings = NativeInstaller.run(&installer).expect("installer runs");

        assert!(warnings.is_empty());
        assert!(!installer.exists());
    }

    #[test]
    fn missing_archive_is_an_open_failure() {
        let temp = TempDir::new().expect("temp dir");
        let result =
            ArchiveInstaller.install(&temp.path().join("absent.zip"), temp.path(), temp.path());
        assert!(matches!(result, Err(InstallError::Open { .. })));
    }
}
