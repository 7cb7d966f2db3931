use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::decode::{DecodeError, SharedImage};
use crate::fetch::FetchError;
use crate::locator::{Locator, SourceKind};

/// Where a delivered image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadedLocation {
    /// Nothing was loaded
    None,
    /// Served synchronously from the cache
    Cache,
    LocalFile,
    ExternalFile,
}

impl From<SourceKind> for LoadedLocation {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::LocalFile => LoadedLocation::LocalFile,
            SourceKind::ExternalFile => LoadedLocation::ExternalFile,
        }
    }
}

/// Opaque consumer identity used for selective cancellation.
///
/// The loader only compares target ids; it never holds the consumer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId(Uuid);

impl TargetId {
    pub fn new() -> Self {
        TargetId(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a load failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fetch,
    Decode,
    Timeout,
    /// The loader was cleaned up while the load was pending
    Shutdown,
}

/// Internal failure detail; consumers see only its [`FailureKind`]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("decode task failed: {0}")]
    DecodeTask(String),

    /// The fetch task panicked or was aborted
    #[error("fetch task failed: {0}")]
    FetchTask(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl LoadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LoadError::Fetch(_) | LoadError::FetchTask(_) => FailureKind::Fetch,
            LoadError::Decode(_) | LoadError::DecodeTask(_) => FailureKind::Decode,
            LoadError::Timeout(_) => FailureKind::Timeout,
        }
    }
}

/// What a completion receives
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub success: bool,
    pub location: LoadedLocation,
    pub image: Option<SharedImage>,
    pub locator: Locator,
    pub target: Option<TargetId>,
    /// Set exactly when `success` is false
    pub failure: Option<FailureKind>,
}

impl LoadOutcome {
    pub(crate) fn loaded(
        locator: Locator,
        target: Option<TargetId>,
        location: LoadedLocation,
        image: SharedImage,
    ) -> Self {
        Self {
            success: true,
            location,
            image: Some(image),
            locator,
            target,
            failure: None,
        }
    }

    pub(crate) fn failed(locator: Locator, target: Option<TargetId>, failure: FailureKind) -> Self {
        Self {
            success: false,
            location: LoadedLocation::None,
            image: None,
            locator,
            target,
            failure: Some(failure),
        }
    }
}

/// Invoked once per registration when its load resolves
pub type Completion = Box<dyn FnOnce(LoadOutcome) + Send + 'static>;
