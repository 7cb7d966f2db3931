//! Bundled assets, served from an object_store backend

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory, path::Path as StorePath};
use std::path::Path;
use std::sync::Arc;

use super::{FetchError, Fetched, Fetcher, Result};
use crate::locator::{Locator, SourceKind};

/// Resolves `bundle:///<name>` against an asset store
#[derive(Clone)]
pub struct BundleFetcher {
    store: Arc<dyn ObjectStore>,
}

impl BundleFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Bundle rooted at a directory on disk
    pub fn from_dir(root: impl AsRef<Path>) -> Result<Self> {
        let store = LocalFileSystem::new_with_prefix(root.as_ref())?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Empty in-memory bundle for tests and embedding
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Add an asset to the bundle
    pub async fn insert(&self, name: &str, data: impl Into<Bytes>) -> Result<()> {
        let path = StorePath::from(name);
        let data: Bytes = data.into();
        self.store.put(&path, data.into()).await?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for BundleFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Fetched> {
        let name = locator
            .bundle_path()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FetchError::InvalidLocator(locator.to_string()))?;

        let bytes = self.store.get(&StorePath::from(name)).await?.bytes().await?;

        tracing::debug!(name, size = bytes.len(), "Loaded bundled asset");

        Ok(Fetched {
            bytes,
            source: SourceKind::LocalFile,
        })
    }
}
