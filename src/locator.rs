//! Resource locators: the cache key and the coalescing key

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const SCHEME_FILE: &str = "file";
pub const SCHEME_BUNDLE: &str = "bundle";

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Invalid locator '{input}': {reason}")]
    Invalid { input: String, reason: String },

    #[error("Path is not absolute: {0}")]
    RelativePath(String),
}

/// Where the bytes for a locator come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// On-device: local files and bundled assets
    LocalFile,
    /// Network
    ExternalFile,
}

/// Opaque resource identifier. Two equal locators name the same image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(Url);

impl Locator {
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        Url::parse(input.trim())
            .map(Locator)
            .map_err(|e| LocatorError::Invalid {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    /// `file://` locator for an absolute path
    pub fn from_file_path(path: impl AsRef<Path>) -> Result<Self, LocatorError> {
        let path = path.as_ref();
        Url::from_file_path(path)
            .map(Locator)
            .map_err(|_| LocatorError::RelativePath(path.display().to_string()))
    }

    /// `bundle:///<name>` locator for an asset shipped with the application
    pub fn bundled(name: &str) -> Result<Self, LocatorError> {
        Self::parse(&format!("{}:///{}", SCHEME_BUNDLE, name.trim_start_matches('/')))
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Source kind implied by the scheme, `None` when no fetcher handles it
    pub fn source_kind(&self) -> Option<SourceKind> {
        match self.scheme() {
            SCHEME_FILE | SCHEME_BUNDLE => Some(SourceKind::LocalFile),
            "http" | "https" => Some(SourceKind::ExternalFile),
            _ => None,
        }
    }

    /// Asset name inside the bundle for `bundle:` locators
    pub fn bundle_path(&self) -> Option<&str> {
        (self.scheme() == SCHEME_BUNDLE).then(|| self.0.path().trim_start_matches('/'))
    }
}

impl From<Url> for Locator {
    fn from(url: Url) -> Self {
        Locator(url)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Locator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Locator::parse(&raw).map_err(serde::de::Error::custom)
    }
}
