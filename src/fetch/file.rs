use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{FetchError, Fetched, Fetcher, Result};
use crate::locator::{Locator, SourceKind};

/// Reads `file://` locators from the local file system
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Fetched> {
        let path = locator
            .url()
            .to_file_path()
            .map_err(|_| FetchError::InvalidLocator(locator.to_string()))?;

        let data = tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
            path: path.display().to_string(),
            source,
        })?;

        debug!(path = %path.display(), size = data.len(), "Read local file");

        Ok(Fetched {
            bytes: Bytes::from(data),
            source: SourceKind::LocalFile,
        })
    }
}
