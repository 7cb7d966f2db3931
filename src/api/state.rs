use std::sync::Arc;

use crate::loader::Loader;
use crate::registry::Registry;

/// Maximum locators accepted by one `POST /prefetch`
pub const DEFAULT_MAX_PREFETCH: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub loader: Loader,
    pub max_prefetch: usize,
}

impl AppState {
    /// Serve the registry's "Default" loader
    pub fn new(registry: Arc<Registry>) -> Self {
        let loader = registry.default_loader();
        Self {
            registry,
            loader,
            max_prefetch: DEFAULT_MAX_PREFETCH,
        }
    }

    /// Serve a named loader instead of the default one
    pub fn with_loader_name(registry: Arc<Registry>, name: &str) -> Self {
        let loader = registry.loader_with_name(name);
        Self {
            registry,
            loader,
            max_prefetch: DEFAULT_MAX_PREFETCH,
        }
    }
}
