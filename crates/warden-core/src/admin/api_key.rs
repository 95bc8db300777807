//! API key resolution and rotation.
//!
//! The key is never cached: each call re-reads the node settings and the key
//! file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::{ADMIN_TARGET, AdminClient, AdminError};

/// Name of the key file inside `apiKeyPath`.
pub const API_KEY_FILE: &str = "apikey.txt";

/// Errors raised while resolving the API key.
#[derive(Debug, Error)]
pub enum ApiKeyError {
    /// The node settings could not be fetched, or key generation failed.
    #[error(transparent)]
    Admin(#[from] AdminError),
    /// The node settings name no key directory.
    #[error("node settings do not define apiKeyPath")]
    MissingKeyPath,
    /// The key file exists but could not be read or removed.
    #[error("failed to access API key file {path:?}: {source}")]
    KeyFile {
        /// Key file.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// The node generated an empty key.
    #[error("node returned an empty API key")]
    EmptyKey,
}

/// Resolves the node API key from disk, generating one when needed.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyStore<'a> {
    admin: &'a AdminClient,
    node_home: &'a Path,
}

impl<'a> ApiKeyStore<'a> {
    /// Resolves relative key paths against `node_home`.
    #[must_use]
    pub const fn new(admin: &'a AdminClient, node_home: &'a Path) -> Self {
        Self { admin, node_home }
    }

    /// Returns the current key, generating a fresh one when the file is
    /// absent or empty.
    pub fn get_api_key(&self) -> Result<String, ApiKeyError> {
        let path = self.key_file()?;
        match fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_owned()),
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ApiKeyError::KeyFile { path, source }),
        }
        self.regenerate(&path)
    }

    /// Discards the current key and asks the node for a new one.
    pub fn reset_api_key(&self) -> Result<String, ApiKeyError> {
        let path = self.key_file()?;
        self.regenerate(&path)
    }

    fn regenerate(&self, path: &Path) -> Result<String, ApiKeyError> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ApiKeyError::KeyFile {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        let key = self.admin.generate_api_key()?;
        if key.is_empty() {
            return Err(ApiKeyError::EmptyKey);
        }
        info!(target: ADMIN_TARGET, path = %path.display(), "generated new API key");
        Ok(key)
    }

    fn key_file(&self) -> Result<PathBuf, ApiKeyError> {
        let settings = self.admin.settings()?;
        let configured = settings.api_key_path.ok_or(ApiKeyError::MissingKeyPath)?;
        let configured_dir = Path::new(&configured);
        let directory = if configured_dir.is_absolute() {
            configured_dir.to_path_buf()
        } else {
            self.node_home.join(configured_dir)
        };
        Ok(directory.join(API_KEY_FILE))
    }
}
