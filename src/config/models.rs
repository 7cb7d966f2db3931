use crate::humanize::{ByteSize, HumanDuration};
use crate::loader::{DEFAULT_MAX_CONCURRENT_LOADS, LoaderSettings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpClientConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Settings every registry-created loader starts with
    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            max_concurrent_loads: self.loader.max_concurrent_loads,
            loading_timeout: self.loader.loading_timeout.as_duration(),
        }
    }
}

/// Loader defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    /// "0s" disables the timeout
    #[serde(default = "default_loading_timeout")]
    pub loading_timeout: HumanDuration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: default_max_concurrent_loads(),
            loading_timeout: default_loading_timeout(),
        }
    }
}

fn default_max_concurrent_loads() -> usize {
    DEFAULT_MAX_CONCURRENT_LOADS
}

fn default_loading_timeout() -> HumanDuration {
    HumanDuration::secs(30)
}

/// Shared default image cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_count_limit")]
    pub count_limit: NonZeroUsize,
    /// Upper bound on the summed decoded size of cached images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<ByteSize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            count_limit: default_count_limit(),
            cost_limit: None,
        }
    }
}

fn default_count_limit() -> NonZeroUsize {
    NonZeroUsize::new(crate::cache::DEFAULT_COUNT_LIMIT).unwrap_or(NonZeroUsize::MIN)
}

/// Remote fetch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::secs(60)
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    concat!("imagebox/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Bundled assets (`bundle:///` locators)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BundleConfig {
    /// Directory bundled assets are read from; bundle locators fail when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DecodeConfig {
    /// Reject images wider or taller than this many pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dimension: Option<u32>,
}

/// HTTP preview server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
