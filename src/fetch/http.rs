//! HTTP(S) fetcher

use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

use super::{FetchError, Fetched, Fetcher, Result};
use crate::locator::{Locator, SourceKind};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_redirects: 10,
            user_agent: concat!("imagebox/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Downloads remote images. No retries: a failed attempt fails the load.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Fetched> {
        let url = locator.as_str();
        debug!(url, "Starting download");

        let response = self
            .client
            .get(locator.url().clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else if e.is_redirect() {
                    FetchError::TooManyRedirects
                } else {
                    FetchError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            check_content_type(content_type)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::RequestFailed(format!("Failed to read body: {}", e)))?;

        debug!(url, size = bytes.len(), "Download completed");

        Ok(Fetched {
            bytes,
            source: SourceKind::ExternalFile,
        })
    }
}

/// Reject bodies that declare a non-image media type. Unparseable and
/// generic binary types are let through for the decoder to judge.
fn check_content_type(raw: &str) -> Result<()> {
    let Ok(parsed) = raw.parse::<mime::Mime>() else {
        return Ok(());
    };

    if parsed.type_() == mime::IMAGE || parsed == mime::APPLICATION_OCTET_STREAM {
        Ok(())
    } else {
        Err(FetchError::NotAnImage(parsed.essence_str().to_string()))
    }
}
