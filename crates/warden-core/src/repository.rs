//! Locating and removing the node's on-disk repository.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::location::InstallLocation;
use crate::platform::{HostOs, NODE_SETTINGS, PlatformProfile};

const REPOSITORY_TARGET: &str = "warden::repository";
/// Directory holding the repository database under the repository root.
pub const DB_DIR: &str = "db";
const WINDOWS_DATA_DIR: &str = "Qortal";

/// Errors raised while locating or removing the repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A node settings file exists but could not be read.
    #[error("failed to read node settings {path:?}: {source}")]
    ReadSettings {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A node settings file is not valid JSON.
    #[error("node settings {path:?} are malformed: {source}")]
    ParseSettings {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Nothing to delete.
    #[error("no repository found at {0:?}")]
    Missing(PathBuf),
    /// The node could not be stopped, so the repository stays.
    #[error("node is still running; refusing to delete {0:?}")]
    NodeRunning(PathBuf),
    /// Removal failed part way.
    #[error("failed to remove repository {path:?}: {source}")]
    Remove {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSettingsFile {
    repository_path: Option<String>,
    user_path: Option<String>,
}

/// Resolves the repository root, without the trailing `db` segment.
///
/// Windows installs consult the system settings for a user path and that
/// user's settings for a repository path, falling back to the local data
/// directory. Other hosts honour a repository path in the install
/// directory's settings, falling back to the install directory itself.
/// Relative paths resolve against the directory holding the settings file.
pub fn resolve_repository_path(
    profile: &PlatformProfile,
    location: &InstallLocation,
) -> Result<PathBuf, RepositoryError> {
    let install_dir = location.dir();
    let root = if profile.os == HostOs::Windows {
        let user_dir = read_settings(install_dir)?
            .and_then(|settings| non_empty(settings.user_path))
            .map(|user_path| install_dir.join(user_path));
        let repository = match &user_dir {
            Some(user_dir) => read_settings(user_dir)?
                .and_then(|settings| non_empty(settings.repository_path))
                .map(|repository| user_dir.join(repository)),
            None => None,
        };
        repository.unwrap_or_else(|| profile.local_data_dir.join(WINDOWS_DATA_DIR))
    } else {
        read_settings(install_dir)?
            .and_then(|settings| non_empty(settings.repository_path))
            .map_or_else(|| install_dir.to_path_buf(), |repository| install_dir.join(repository))
    };
    let root = strip_db_segment(&root);
    debug!(target: REPOSITORY_TARGET, root = %root.display(), "repository resolved");
    Ok(root)
}

/// The database directory under a repository root.
#[must_use]
pub fn db_dir(root: &Path) -> PathBuf {
    root.join(DB_DIR)
}

/// Drops one trailing `db` component so callers can append it uniformly.
#[must_use]
pub fn strip_db_segment(path: &Path) -> PathBuf {
    match path.components().next_back() {
        Some(Component::Normal(last)) if last == DB_DIR => {
            path.parent().map_or_else(|| path.to_path_buf(), Path::to_path_buf)
        }
        _ => path.to_path_buf(),
    }
}

/// Recursively removes the database directory under `root`.
pub fn remove_db(root: &Path) -> Result<PathBuf, RepositoryError> {
    let db = db_dir(root);
    if !db.is_dir() {
        return Err(RepositoryError::Missing(db));
    }
    fs::remove_dir_all(&db).map_err(|source| RepositoryError::Remove {
        path: db.clone(),
        source,
    })?;
    debug!(target: REPOSITORY_TARGET, db = %db.display(), "repository removed");
    Ok(db)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn read_settings(dir: &Path) -> Result<Option<NodeSettingsFile>, RepositoryError> {
    let path = dir.join(NODE_SETTINGS);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(RepositoryError::ReadSettings { path, source }),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| RepositoryError::ParseSettings { path, source })
}
