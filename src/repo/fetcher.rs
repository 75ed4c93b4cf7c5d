//! Abstract fetch provider.
//!
//! The core never speaks HTTP itself; it depends on a [`Fetcher`] that
//! turns a URL into a byte stream. The core contributes the URL shape, the
//! caching rule (`if_modified_since`), and the retry policy: exponential
//! backoff starting at one second, capped by a caller-configured attempt
//! count and total time budget.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{PkgError, Result};

/// Outcome of opening a URL.
pub enum FetchOutcome {
    /// The resource body.
    Stream(Box<dyn Read>),
    /// The resource has not changed since `if_modified_since`.
    NotModified,
}

impl std::fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::NotModified => f.write_str("NotModified"),
        }
    }
}

/// Fetch provider contract: `open(url, if_modified_since)` yields a stream,
/// a not-modified signal, or an error.
pub trait Fetcher {
    /// What: Open a URL for reading.
    ///
    /// Inputs:
    /// - `url`: Resource to open.
    /// - `if_modified_since`: Unix timestamp; when the resource is no newer
    ///   the provider may answer `NotModified` instead of a body.
    ///
    /// Output:
    /// - The fetch outcome.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` for transport failures (retryable) and other
    /// kinds for permanent failures.
    fn open(&self, url: &str, if_modified_since: Option<u64>) -> Result<FetchOutcome>;
}

/// Fetcher for `file://` URLs and plain paths. Always available; used for
/// local mirrors and in tests.
#[derive(Debug, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn open(&self, url: &str, if_modified_since: Option<u64>) -> Result<FetchOutcome> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = PathBuf::from(path);
        let meta = std::fs::metadata(&path)?;
        if let Some(since) = if_modified_since {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            if mtime <= since {
                return Ok(FetchOutcome::NotModified);
            }
        }
        Ok(FetchOutcome::Stream(Box::new(File::open(&path)?)))
    }
}

/// HTTP(S) fetcher over a blocking reqwest client.
#[cfg(feature = "http")]
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    /// What: Build the HTTP fetcher.
    ///
    /// Inputs:
    /// - `timeout`: Per-request timeout, normally the configured
    ///   `FETCH_TIMEOUT`.
    ///
    /// Output:
    /// - The fetcher.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` when the underlying client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("binpkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::Parse(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn open(&self, url: &str, if_modified_since: Option<u64>) -> Result<FetchOutcome> {
        let mut request = self.client.get(url);
        if let Some(since) = if_modified_since {
            let when = std::time::UNIX_EPOCH + Duration::from_secs(since);
            request = request.header(
                reqwest::header::IF_MODIFIED_SINCE,
                httpdate::fmt_http_date(when),
            );
        }
        let response = request
            .send()
            .map_err(|e| PkgError::Io(std::io::Error::other(e)))?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(PkgError::Io(std::io::Error::other(format!(
                "{url}: HTTP {}",
                response.status()
            ))));
        }
        Ok(FetchOutcome::Stream(Box::new(response)))
    }
}

/// In-memory fetcher for tests: canned bodies per URL, optional transient
/// failures before success.
#[derive(Debug, Default)]
pub struct MockFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl MockFetcher {
    /// Empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body for a URL.
    pub fn with_body(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        {
            let mut bodies = match self.bodies.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            bodies.insert(url.into(), body.into());
        }
        self
    }

    /// Make the next `count` opens of a URL fail with a transient error.
    pub fn with_transient_failures(self, url: impl Into<String>, count: u32) -> Self {
        {
            let mut failures = match self.failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            failures.insert(url.into(), count);
        }
        self
    }
}

impl Fetcher for MockFetcher {
    fn open(&self, url: &str, _if_modified_since: Option<u64>) -> Result<FetchOutcome> {
        {
            let mut failures = match self.failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(remaining) = failures.get_mut(url)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(PkgError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    format!("{url}: simulated transient failure"),
                )));
            }
        }
        let bodies = match self.bodies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match bodies.get(url) {
            Some(body) => Ok(FetchOutcome::Stream(Box::new(std::io::Cursor::new(
                body.clone(),
            )))),
            None => Err(PkgError::NotFound(url.to_string())),
        }
    }
}

/// What: Open a URL with retries and exponential backoff.
///
/// Inputs:
/// - `fetcher`: Underlying provider.
/// - `url`: Resource.
/// - `if_modified_since`: Caching hint passed through.
/// - `retries`: Maximum attempts (configured `FETCH_RETRY`, default 3).
/// - `total_timeout`: Wall-clock budget across attempts (`FETCH_TIMEOUT`).
///
/// Output:
/// - The first successful outcome.
///
/// Details:
/// - Backoff starts at one second and doubles per attempt; only transient
///   (`Io`) errors are retried, and never past the total budget.
///
/// # Errors
///
/// Returns the last error once attempts or budget are exhausted.
pub fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    if_modified_since: Option<u64>,
    retries: u32,
    total_timeout: Duration,
) -> Result<FetchOutcome> {
    let started = Instant::now();
    let mut backoff = Duration::from_secs(1);
    let attempts = retries.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match fetcher.open(url, if_modified_since) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(url = %url, attempt, error = %e, "fetch failed, backing off");
                last_err = Some(e);
                if started.elapsed() + backoff > total_timeout {
                    break;
                }
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        PkgError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{url}: fetch budget exhausted"),
        ))
    }))
}
