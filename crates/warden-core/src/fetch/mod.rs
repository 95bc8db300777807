//! HTTP artifact fetching.
//!
//! Redirects are followed by hand so every hop can be checked against a
//! visited set and a hop limit. Bodies stream straight to disk while a
//! running byte count feeds progress callbacks.

mod manager;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, LOCATION, RANGE};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub use manager::{ArtifactClass, DownloadJob, DownloadManager, DownloadOutcome};

const FETCH_TARGET: &str = "warden::fetch";
const USER_AGENT: &str = "QortalDesktop/1.0 (+https://qortal.org)";
const ACCEPT_ARTIFACTS: &str = "application/octet-stream,*/*";
const CHUNK_SIZE: usize = 64 * 1024;

/// Limits applied to one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Redirect hops allowed before giving up.
    pub max_redirects: usize,
    /// Longest silence tolerated on a connection.
    pub inactivity_timeout: Duration,
}

impl FetchPolicy {
    /// Limits for artifact downloads.
    pub const DOWNLOAD: Self = Self {
        max_redirects: 10,
        inactivity_timeout: Duration::from_secs(30),
    };

    /// Limits for existence probes.
    pub const PROBE: Self = Self {
        max_redirects: 5,
        inactivity_timeout: Duration::from_secs(10),
    };
}

/// Download progress after each received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes written so far.
    pub received_bytes: u64,
    /// Size advertised by the server, when known.
    pub total_bytes: Option<u64>,
    /// Whole-number completion, when the size is known.
    pub percent: Option<u8>,
}

impl Progress {
    fn new(received_bytes: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes
            .and_then(|total| received_bytes.saturating_mul(100).checked_div(total))
            .map(|scaled| u8::try_from(scaled.min(100)).unwrap_or(100));
        Self {
            received_bytes,
            total_bytes,
            percent,
        }
    }
}

/// Errors raised while downloading an artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// A URL (initial or redirect target) did not parse.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        /// Offending text.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// A redirect pointed back at a URL already visited.
    #[error("redirect loop detected at {url}")]
    RedirectLoop {
        /// URL visited twice.
        url: String,
    },
    /// The redirect chain exceeded its hop limit.
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects {
        /// Initial URL.
        url: String,
        /// Hop limit.
        limit: usize,
    },
    /// A redirect response carried no usable `Location`.
    #[error("redirect from {url} has no Location header")]
    MissingLocation {
        /// URL that answered with the redirect.
        url: String,
    },
    /// The server answered with an error status.
    #[error("{url} answered with HTTP {status}")]
    Status {
        /// URL that failed.
        url: String,
        /// Response status.
        status: StatusCode,
    },
    /// The connection stayed silent past the inactivity timeout.
    #[error("timed out waiting for {url}")]
    Timeout {
        /// URL that stalled.
        url: String,
    },
    /// The request could not be sent or the response not received.
    #[error("request to {url} failed: {source}")]
    Request {
        /// URL that failed.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The body stream broke mid-transfer.
    #[error("failed reading body of {url}: {source}")]
    Stream {
        /// URL being read.
        url: String,
        /// I/O error.
        #[source]
        source: io::Error,
    },
    /// The destination file could not be written.
    #[error("failed writing {path:?}: {source}")]
    Write {
        /// Destination file.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },
}

/// Blocking HTTP fetcher with manual redirect handling.
#[derive(Debug, Clone)]
pub struct Fetcher {
    download_client: Client,
    probe_client: Client,
    download_policy: FetchPolicy,
    probe_policy: FetchPolicy,
}

impl Fetcher {
    /// Builds a fetcher with the standard limits.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_policies(FetchPolicy::DOWNLOAD, FetchPolicy::PROBE)
    }

    /// Builds a fetcher with explicit limits.
    pub fn with_policies(download: FetchPolicy, probe: FetchPolicy) -> Result<Self, FetchError> {
        Ok(Self {
            download_client: build_client(download)?,
            probe_client: build_client(probe)?,
            download_policy: download,
            probe_policy: probe,
        })
    }

    /// Downloads `url` into `destination`, reporting progress per chunk.
    ///
    /// A partially written destination is removed when the transfer fails.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<PathBuf, FetchError> {
        let start = parse_url(url)?;
        let (final_url, response) = follow_redirects(self.download_policy, &start, |current| {
            self.download_client
                .get(current.clone())
                .header(ACCEPT, ACCEPT_ARTIFACTS)
        })?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status {
                url: final_url.to_string(),
                status,
            });
        }

        info!(
            target: FETCH_TARGET,
            url = %final_url,
            destination = %destination.display(),
            total_bytes = ?response.content_length(),
            "download started"
        );
        match stream_to_file(response, &final_url, destination, on_progress) {
            Ok(received) => {
                info!(
                    target: FETCH_TARGET,
                    url = %final_url,
                    received_bytes = received,
                    "download finished"
                );
                Ok(destination.to_path_buf())
            }
            Err(error) => {
                if let Err(cleanup) = fs::remove_file(destination) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(
                            target: FETCH_TARGET,
                            path = %destination.display(),
                            error = %cleanup,
                            "failed to remove partial download"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    /// Reports whether `url` names an artifact the server will deliver.
    ///
    /// Uses `HEAD`, falling back to a one-byte ranged `GET` when the server
    /// rejects `HEAD`. Any transport failure reads as "absent".
    #[must_use]
    pub fn existence_probe(&self, url: &str) -> bool {
        let Ok(start) = parse_url(url) else {
            return false;
        };
        let head = follow_redirects(self.probe_policy, &start, |current| {
            self.probe_client.head(current.clone())
        });
        let (final_url, response) = match head {
            Ok(found) => found,
            Err(error) => {
                debug!(target: FETCH_TARGET, url, error = %error, "existence probe failed");
                return false;
            }
        };
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return true;
        }
        if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
            debug!(target: FETCH_TARGET, url, status = status.as_u16(), "artifact absent");
            return false;
        }

        let ranged = follow_redirects(self.probe_policy, &final_url, |current| {
            self.probe_client
                .get(current.clone())
                .header(RANGE, "bytes=0-0")
        });
        match ranged {
            Ok((_, ranged_response)) => matches!(
                ranged_response.status(),
                StatusCode::OK | StatusCode::PARTIAL_CONTENT
            ),
            Err(error) => {
                debug!(target: FETCH_TARGET, url, error = %error, "ranged probe failed");
                false
            }
        }
    }

    /// Returns `primary` when the probe finds it, otherwise `backup`.
    #[must_use]
    pub fn pick_mirror<'a>(&self, primary: &'a str, backup: &'a str) -> &'a str {
        if self.existence_probe(primary) {
            primary
        } else {
            info!(
                target: FETCH_TARGET,
                primary,
                backup,
                "primary mirror unavailable; using backup"
            );
            backup
        }
    }
}

fn build_client(policy: FetchPolicy) -> Result<Client, FetchError> {
    Client::builder()
        .redirect(Policy::none())
        .timeout(policy.inactivity_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(FetchError::Client)
}

fn parse_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|source| FetchError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })
}

const fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Sends the request built by `request` and chases redirects until a
/// non-redirect response arrives.
fn follow_redirects<F>(
    policy: FetchPolicy,
    start: &Url,
    request: F,
) -> Result<(Url, Response), FetchError>
where
    F: Fn(&Url) -> RequestBuilder,
{
    let mut visited = HashSet::from([start.clone()]);
    let mut current = start.clone();
    let mut hops = 0usize;
    loop {
        let response = request(&current)
            .send()
            .map_err(|source| classify_request_error(&current, source))?;
        if !is_followed_redirect(response.status()) {
            return Ok((current, response));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| FetchError::MissingLocation {
                url: current.to_string(),
            })?;
        let next = current.join(location).map_err(|source| FetchError::InvalidUrl {
            url: location.to_owned(),
            source,
        })?;

        hops += 1;
        if hops > policy.max_redirects {
            return Err(FetchError::TooManyRedirects {
                url: start.to_string(),
                limit: policy.max_redirects,
            });
        }
        if !visited.insert(next.clone()) {
            return Err(FetchError::RedirectLoop {
                url: next.to_string(),
            });
        }
        debug!(target: FETCH_TARGET, from = %current, to = %next, hops, "following redirect");
        current = next;
    }
}

fn classify_request_error(url: &Url, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            source,
        }
    }
}

fn stream_to_file(
    mut response: Response,
    url: &Url,
    destination: &Path,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<u64, FetchError> {
    let write_error = |source| FetchError::Write {
        path: destination.to_path_buf(),
        source,
    };
    let total = response.content_length().filter(|length| *length > 0);
    let file = File::create(destination).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    let mut received = 0_u64;
    loop {
        let read = match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == io::ErrorKind::TimedOut => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                });
            }
            Err(source) => {
                return Err(FetchError::Stream {
                    url: url.to_string(),
                    source,
                });
            }
        };
        let chunk = buffer.get(..read).unwrap_or_default();
        writer.write_all(chunk).map_err(write_error)?;
        received += u64::try_from(read).unwrap_or(u64::MAX);
        on_progress(Progress::new(received, total));
    }
    writer.flush().map_err(write_error)?;
    Ok(received)
}
