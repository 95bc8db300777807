//! Client for the node's loopback control API.

mod api_key;

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use api_key::{API_KEY_FILE, ApiKeyError, ApiKeyStore};

const ADMIN_TARGET: &str = "warden::admin";
/// Header carrying the node API key.
pub const API_KEY_HEADER: &str = "X-API-KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by control API calls.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The HTTP client could not be constructed.
    #[error("failed to build admin client: {0}")]
    Client(#[source] reqwest::Error),
    /// The base URL could not be combined with an endpoint path.
    #[error("invalid admin endpoint '{endpoint}': {source}")]
    Endpoint {
        /// Endpoint path.
        endpoint: &'static str,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The node could not be reached.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Endpoint path.
        endpoint: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The node answered with a non-success status.
    #[error("{endpoint} answered with HTTP {status}")]
    Status {
        /// Endpoint path.
        endpoint: &'static str,
        /// Response status.
        status: StatusCode,
    },
    /// The response body could not be decoded.
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        /// Endpoint path.
        endpoint: &'static str,
        /// Decode failure.
        #[source]
        source: reqwest::Error,
    },
}

/// Subset of `/admin/settings` the launcher interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    /// Directory holding `apikey.txt`, relative to the node home when not
    /// absolute.
    pub api_key_path: Option<String>,
    /// Repository directory override.
    pub repository_path: Option<String>,
}

/// Anything that can tell whether the control API answers.
#[cfg_attr(test, mockall::automock)]
pub trait ApiProbe: Send + Sync {
    /// Returns `true` when the control API responds successfully.
    fn is_responding(&self) -> bool;
}

/// Blocking client for the control endpoints.
#[derive(Debug, Clone)]
pub struct AdminClient {
    base: Url,
    client: Client,
}

impl AdminClient {
    /// Targets the control API at `base`.
    pub fn new(base: Url) -> Result<Self, AdminError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(AdminError::Client)?;
        Ok(Self { base, client })
    }

    /// Targets the control API on `127.0.0.1:port`.
    pub fn loopback(port: u16) -> Result<Self, AdminError> {
        let base = Url::parse(&format!("http://127.0.0.1:{port}")).map_err(|source| {
            AdminError::Endpoint {
                endpoint: "/",
                source,
            }
        })?;
        Self::new(base)
    }

    /// Base URL of the control API.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// `GET /admin/info`.
    pub fn info(&self) -> Result<serde_json::Value, AdminError> {
        const ENDPOINT: &str = "/admin/info";
        let response = self.send(ENDPOINT, self.get(ENDPOINT)?)?;
        response
            .json()
            .map_err(|source| AdminError::Decode {
                endpoint: ENDPOINT,
                source,
            })
    }

    /// `GET /admin/settings`.
    pub fn settings(&self) -> Result<NodeSettings, AdminError> {
        const ENDPOINT: &str = "/admin/settings";
        let response = self.send(ENDPOINT, self.get(ENDPOINT)?)?;
        response
            .json()
            .map_err(|source| AdminError::Decode {
                endpoint: ENDPOINT,
                source,
            })
    }

    /// `POST /admin/apikey/generate`, returning the new key.
    pub fn generate_api_key(&self) -> Result<String, AdminError> {
        const ENDPOINT: &str = "/admin/apikey/generate";
        let request = self.client.post(self.endpoint(ENDPOINT)?);
        let response = self.send(ENDPOINT, request)?;
        let body = response.text().map_err(|source| AdminError::Decode {
            endpoint: ENDPOINT,
            source,
        })?;
        Ok(body.trim().to_owned())
    }

    /// `GET /admin/apikey/test`, reporting whether the node accepts `key`.
    pub fn test_api_key(&self, key: &str) -> Result<bool, AdminError> {
        const ENDPOINT: &str = "/admin/apikey/test";
        let request = self.get(ENDPOINT)?.header(API_KEY_HEADER, key);
        match self.send(ENDPOINT, request) {
            Ok(_) => Ok(true),
            Err(AdminError::Status { status, .. })
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// `GET /admin/stop`, asking the node to shut down.
    pub fn stop(&self, key: &str) -> Result<(), AdminError> {
        const ENDPOINT: &str = "/admin/stop";
        let request = self.get(ENDPOINT)?.header(API_KEY_HEADER, key);
        self.send(ENDPOINT, request).map(drop)
    }

    /// `GET /admin/bootstrap`, asking the node to rebuild from a bootstrap.
    pub fn bootstrap(&self, key: &str) -> Result<(), AdminError> {
        const ENDPOINT: &str = "/admin/bootstrap";
        let request = self.get(ENDPOINT)?.header(API_KEY_HEADER, key);
        self.send(ENDPOINT, request).map(drop)
    }

    fn endpoint(&self, path: &'static str) -> Result<Url, AdminError> {
        self.base.join(path).map_err(|source| AdminError::Endpoint {
            endpoint: path,
            source,
        })
    }

    fn get(&self, path: &'static str) -> Result<RequestBuilder, AdminError> {
        Ok(self.client.get(self.endpoint(path)?))
    }

    fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::blocking::Response, AdminError> {
        let response = request
            .send()
            .map_err(|source| AdminError::Transport { endpoint, source })?;
        let status = response.status();
        debug!(target: ADMIN_TARGET, endpoint, status = status.as_u16(), "admin call");
        if status.is_success() {
            Ok(response)
        } else {
            Err(AdminError::Status { endpoint, status })
        }
    }
}

impl ApiProbe for AdminClient {
    fn is_responding(&self) -> bool {
        self.info().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client(server: &MockServer) -> AdminClient {
        AdminClient::new(Url::parse(&server.base_url()).expect("url")).expect("client")
    }

    #[test]
    fn stop_sends_the_key_header() {
        let server = MockServer::start();
        let stop = server.mock(|when, then| {
            when.method(GET).path("/admin/stop").header(API_KEY_HEADER, "secret");
            then.status(200).body("true");
        });
        client(&server).stop("secret").expect("stop accepted");
        stop.assert();
    }

    #[test]
    fn non_success_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/admin/bootstrap");
            then.status(500);
        });
        let result = client(&server).bootstrap("secret");
        assert!(matches!(result, Err(AdminError::Status { status, .. }) if status == 500));
    }

    #[test]
    fn settings_decode_optional_paths() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/admin/settings");
            then.status(200)
                .json_body(serde_json::json!({ "apiKeyPath": "keys", "maxPeers": 32 }));
        });
        let settings = client(&server).settings().expect("settings");
        assert_eq!(settings.api_key_path.as_deref(), Some("keys"));
        assert_eq!(settings.repository_path, None);
    }

    #[test]
    fn rejected_key_tests_false() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/admin/apikey/test");
            then.status(401);
        });
        assert!(!client(&server).test_api_key("stale").expect("test call"));
    }

    #[test]
    fn unreachable_node_is_not_responding() {
        let client = AdminClient::loopback(1).expect("client");
        assert!(!client.is_responding());
    }
}
