//! Fetch primitives: locator in, raw bytes out
//!
//! A [`Fetcher`] retrieves the bytes behind a [`Locator`] and reports whether
//! they came from the device or the network. Cancelling a fetch is dropping
//! its future; the loader does this on cancellation and timeout.

mod bundle;
mod file;
mod http;

pub use bundle::BundleFetcher;
pub use file::FileFetcher;
pub use http::{HttpConfig, HttpFetcher};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::locator::{Locator, SCHEME_BUNDLE, SCHEME_FILE, SourceKind};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Connection timeout")]
    Timeout,

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Not an image: content type {0}")]
    NotAnImage(String),

    #[error("Bundle error: {0}")]
    Bundle(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Raw bytes plus their provenance
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub source: SourceKind,
}

/// Pluggable fetch primitive
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, locator: &Locator) -> Result<Fetched>;
}

/// Routes each locator to the fetcher for its scheme
pub struct SourceFetcher {
    http: HttpFetcher,
    file: FileFetcher,
    bundle: Option<BundleFetcher>,
}

impl SourceFetcher {
    pub fn new(http: HttpFetcher, bundle: Option<BundleFetcher>) -> Self {
        Self {
            http,
            file: FileFetcher,
            bundle,
        }
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Fetched> {
        match locator.scheme() {
            "http" | "https" => self.http.fetch(locator).await,
            SCHEME_FILE => self.file.fetch(locator).await,
            SCHEME_BUNDLE => match &self.bundle {
                Some(bundle) => bundle.fetch(locator).await,
                None => Err(FetchError::UnsupportedScheme(
                    "bundle (no bundle root configured)".to_string(),
                )),
            },
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}
