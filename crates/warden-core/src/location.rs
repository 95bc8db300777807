//! Install location resolution and the shared launcher settings file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::PlatformProfile;

const SETTINGS_TARGET: &str = "warden::settings";
/// Key holding a user-selected install directory.
pub const CUSTOM_DIR_KEY: &str = "qortalDirectory";

/// Where the node software lives for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallLocation {
    /// The platform's default install directory.
    Default(PathBuf),
    /// A directory the user selected.
    Custom(PathBuf),
}

impl InstallLocation {
    /// The install directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self {
            Self::Default(dir) | Self::Custom(dir) => dir,
        }
    }

    /// Whether the user selected this directory.
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

/// Errors raised while reading or writing the shared settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("failed to read shared settings {path:?}: {source}")]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The file does not hold a JSON object.
    #[error("shared settings {path:?} are not a JSON object: {source}")]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The updated file could not be written.
    #[error("failed to write shared settings {path:?}: {source}")]
    Write {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The directory offered as a custom location holds no node install.
    #[error("no node installation found in {0:?}")]
    NotInstalled(PathBuf),
}

/// JSON settings file shared with the rest of the launcher.
///
/// Unknown keys are preserved on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSettings {
    path: PathBuf,
}

impl SharedSettings {
    /// Uses the settings file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the user configuration directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qortal-hub").join("wallet-storage.json"))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the user-selected install directory, if any.
    pub fn custom_install_dir(&self) -> Result<Option<PathBuf>, SettingsError> {
        let document = self.read_document()?;
        Ok(document
            .get(CUSTOM_DIR_KEY)
            .and_then(Value::as_str)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from))
    }

    /// Records `dir` as the install directory after checking it holds a node.
    pub fn set_custom_install_dir(
        &self,
        profile: &PlatformProfile,
        dir: &Path,
    ) -> Result<(), SettingsError> {
        if !profile.jar_path(dir).is_file() {
            return Err(SettingsError::NotInstalled(dir.to_path_buf()));
        }
        let mut document = self.read_document()?;
        document.insert(
            CUSTOM_DIR_KEY.to_owned(),
            Value::String(dir.to_string_lossy().into_owned()),
        );
        self.write_document(&document)?;
        debug!(target: SETTINGS_TARGET, dir = %dir.display(), "custom install directory recorded");
        Ok(())
    }

    /// Removes the user-selected install directory.
    pub fn clear_custom_install_dir(&self) -> Result<(), SettingsError> {
        let mut document = self.read_document()?;
        if document.remove(CUSTOM_DIR_KEY).is_some() {
            self.write_document(&document)?;
            debug!(target: SETTINGS_TARGET, "custom install directory cleared");
        }
        Ok(())
    }

    /// Resolves the install location for the current operation.
    pub fn resolve_location(&self, profile: &PlatformProfile) -> Result<InstallLocation, SettingsError> {
        Ok(self.custom_install_dir()?.map_or_else(
            || InstallLocation::Default(profile.default_install_dir.clone()),
            InstallLocation::Custom,
        ))
    }

    fn read_document(&self) -> Result<Map<String, Value>, SettingsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), SettingsError> {
        let write_error = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let rendered = serde_json::to_string_pretty(document)
            .map_err(|error| write_error(io::Error::other(error)))?;
        fs::write(&self.path, rendered).map_err(write_error)
    }
}

/// Resolves the install location, clearing a custom directory that no longer
/// holds a node.
pub fn resolve_checked(
    settings: &SharedSettings,
    profile: &PlatformProfile,
) -> Result<InstallLocation, SettingsError> {
    let location = settings.resolve_location(profile)?;
    if location.is_custom() && !profile.jar_path(location.dir()).is_file() {
        warn!(
            target: SETTINGS_TARGET,
            dir = %location.dir().display(),
            "custom install directory no longer holds a node; reverting to default"
        );
        settings.clear_custom_install_dir()?;
        return Ok(InstallLocation::Default(profile.default_install_dir.clone()));
    }
    Ok(location)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::platform::{HostArch, HostDirs, HostOs, resolve};

    fn fixture() -> (TempDir, SharedSettings, PlatformProfile) {
        let temp = TempDir::new().expect("temp dir");
        let settings = SharedSettings::new(temp.path().join("hub").join("wallet-storage.json"));
        let profile = resolve(HostOs::Linux, HostArch::X64, &HostDirs::under_home(temp.path()))
            .expect("profile");
        (temp, settings, profile)
    }

    #[test]
    fn missing_file_resolves_default_location() {
        let (_temp, settings, profile) = fixture();
        let location = settings.resolve_location(&profile).expect("resolve");
        assert_eq!(location, InstallLocation::Default(profile.default_install_dir.clone()));
    }

    #[test]
    fn custom_directory_round_trips_and_preserves_other_keys() {
        let (temp, settings, profile) = fixture();
        let parent = settings.path().parent().expect("parent");
        fs::create_dir_all(parent).expect("mkdir");
        fs::write(settings.path(), r#"{"theme":"dark"}"#).expect("seed");
        let custom = temp.path().join("elsewhere");
        fs::create_dir_all(&custom).expect("mkdir");
        fs::write(custom.join("qortal.jar"), b"jar").expect("jar");

        settings.set_custom_install_dir(&profile, &custom).expect("set");
        assert_eq!(
            settings.resolve_location(&profile).expect("resolve"),
            InstallLocation::Custom(custom)
        );

        settings.clear_custom_install_dir().expect("clear");
        let raw = fs::read_to_string(settings.path()).expect("read");
        assert!(raw.contains("theme"));
        assert!(!raw.contains(CUSTOM_DIR_KEY));
    }

    #[test]
    fn refuses_directories_without_a_node() {
        let (temp, settings, profile) = fixture();
        let result = settings.set_custom_install_dir(&profile, temp.path());
        assert!(matches!(result, Err(SettingsError::NotInstalled(_))));
    }

    #[test]
    fn stale_custom_directory_is_cleared() {
        let (temp, settings, profile) = fixture();
        let parent = settings.path().parent().expect("parent");
        fs::create_dir_all(parent).expect("mkdir");
        let stale = temp.path().join("gone");
        let document = serde_json::json!({ CUSTOM_DIR_KEY: stale });
        fs::write(settings.path(), document.to_string()).expect("seed");

        let location = resolve_checked(&settings, &profile).expect("resolve");
        assert!(!location.is_custom());
        assert_eq!(settings.custom_install_dir().expect("read"), None);
    }
}
