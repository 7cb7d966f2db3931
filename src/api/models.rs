use serde::{Deserialize, Serialize};

use crate::loader::{FailureKind, LoadOutcome, LoadedLocation, PendingInfo};
use crate::locator::Locator;
use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// `?url=` query parameter
#[derive(Debug, Deserialize)]
pub struct LocatorQuery {
    pub url: String,
}

/// Result of `GET /images`
#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    pub locator: Locator,
    pub success: bool,
    pub location: LoadedLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl From<&LoadOutcome> for ImageResponse {
    fn from(outcome: &LoadOutcome) -> Self {
        Self {
            locator: outcome.locator.clone(),
            success: outcome.success,
            location: outcome.location,
            width: outcome.image.as_ref().map(|image| image.width()),
            height: outcome.image.as_ref().map(|image| image.height()),
            failure: outcome.failure,
        }
    }
}

/// Body of `POST /prefetch`
#[derive(Debug, Serialize, Deserialize)]
pub struct PrefetchRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefetchAccepted {
    pub accepted: usize,
}

/// `GET /stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub loader: String,
    pub cached_images: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub max_concurrent_loads: usize,
    pub metrics: MetricsSnapshot,
}

/// `GET /pending`
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub requests: Vec<PendingInfo>,
}
