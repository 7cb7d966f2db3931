//! Named loader directory
//!
//! A [`Registry`] creates loaders on first lookup and tears them down on
//! request. Applications normally build one from configuration and pass it
//! around; [`Registry::global`] exists for code that wants the process-wide
//! "Default" loader without plumbing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{info, warn};

use crate::cache::{CacheStore, ImageCache};
use crate::config::Config;
use crate::decode::ImageDecoder;
use crate::fetch::{BundleFetcher, FetchError, HttpConfig, HttpFetcher, SourceFetcher};
use crate::loader::{Components, Loader, LoaderSettings};

pub const DEFAULT_LOADER_NAME: &str = "Default";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to build fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

pub struct Registry {
    loaders: Mutex<BTreeMap<String, Loader>>,
    settings: LoaderSettings,
    components: Components,
}

impl Registry {
    /// Every loader created here starts from `settings` and shares
    /// `components`, including the default cache.
    pub fn new(settings: LoaderSettings, components: Components) -> Self {
        Self {
            loaders: Mutex::new(BTreeMap::new()),
            settings,
            components,
        }
    }

    /// Build the stock fetchers, decoder and cache from configuration
    pub fn from_config(config: &Config, runtime: Handle) -> Result<Self, RegistryError> {
        let http = HttpFetcher::new(HttpConfig {
            connect_timeout: config.http.connect_timeout.as_duration(),
            request_timeout: config.http.request_timeout.as_duration(),
            max_redirects: config.http.max_redirects,
            user_agent: config.http.user_agent.clone(),
        })?;

        let bundle = match &config.bundle.root {
            Some(root) => Some(BundleFetcher::from_dir(root)?),
            None => None,
        };

        let mut cache = ImageCache::new(config.cache.count_limit);
        if let Some(limit) = config.cache.cost_limit {
            cache = cache.with_cost_limit(limit);
        }

        let mut decoder = ImageDecoder::new();
        if let Some(max) = config.decode.max_dimension {
            decoder = decoder.with_max_dimension(max);
        }

        let components = Components::new(Arc::new(SourceFetcher::new(http, bundle)), runtime)
            .with_cache(Arc::new(cache))
            .with_decoder(Arc::new(decoder));

        Ok(Self::new(config.loader_settings(), components))
    }

    /// Process-wide registry, configured from the environment on first use.
    /// Its loaders run on a dedicated background runtime so they outlive
    /// whichever runtime first touched them.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Config::load().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid configuration, using defaults for global registry");
                Config::default()
            });
            let runtime = background_runtime();
            Registry::from_config(&config, runtime.clone())
                .or_else(|e| {
                    warn!(error = %e, "Falling back to default configuration for global registry");
                    Registry::from_config(&Config::default(), runtime)
                })
                .expect("default registry configuration must build")
        })
    }

    pub fn default_loader(&self) -> Loader {
        self.loader_with_name(DEFAULT_LOADER_NAME)
    }

    pub fn loader_with_name(&self, name: &str) -> Loader {
        let mut loaders = self.lock();
        loaders
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(loader = name, "Creating loader");
                Loader::new(name, self.settings, self.components.clone())
            })
            .clone()
    }

    /// Fail the loader's pending requests and forget it. A later lookup of
    /// the same name creates a fresh loader.
    pub fn cleanup_loader_with_name(&self, name: &str) {
        let removed = self.lock().remove(name);
        if let Some(loader) = removed {
            loader.shutdown();
            info!(loader = name, "Loader cleaned up");
        }
    }

    pub fn default_image_cache(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.components.cache)
    }

    pub fn loader_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Loader>> {
        self.loaders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Convenience for `Registry::global().default_loader()`
pub fn default_loader() -> Loader {
    Registry::global().default_loader()
}

fn background_runtime() -> Handle {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("imagebox-loader")
                .enable_all()
                .build()
                .expect("failed to start imagebox background runtime")
        })
        .handle()
        .clone()
}
