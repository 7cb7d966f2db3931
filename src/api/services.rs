use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use super::{
    error::ApiError,
    models::{
        ImageResponse, LocatorQuery, PendingResponse, PrefetchAccepted, PrefetchRequest,
        StatsResponse,
    },
    state::AppState,
};
use crate::locator::Locator;

/// Load an image and report where it came from (GET /images?url=)
///
/// Waits for the load to resolve. Cache hits answer immediately; misses
/// coalesce with any in-flight load of the same locator. A failed load is
/// reported as 502 with the failure kind in the body.
pub async fn get_image(
    State(state): State<AppState>,
    Query(query): Query<LocatorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let locator = Locator::parse(&query.url)?;

    let outcome = state
        .loader
        .load(&locator)
        .await
        .ok_or_else(|| ApiError::Cancelled(locator.to_string()))?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok((status, Json(ImageResponse::from(&outcome))))
}

/// Cancel every pending load of a locator (DELETE /images?url=)
pub async fn cancel_image(
    State(state): State<AppState>,
    Query(query): Query<LocatorQuery>,
) -> Result<StatusCode, ApiError> {
    let locator = Locator::parse(&query.url)?;
    state.loader.cancel_loading_image(&locator);
    Ok(StatusCode::NO_CONTENT)
}

/// Warm the cache for a batch of locators (POST /prefetch)
///
/// Every locator is validated before any load starts, so a bad entry
/// rejects the whole batch.
pub async fn prefetch(
    State(state): State<AppState>,
    Json(request): Json<PrefetchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.urls.is_empty() {
        return Err(ApiError::InvalidPayload("urls must not be empty".to_string()));
    }

    if request.urls.len() > state.max_prefetch {
        return Err(ApiError::TooManyLocators {
            actual: request.urls.len(),
            limit: state.max_prefetch,
        });
    }

    let locators = request
        .urls
        .iter()
        .map(|url| Locator::parse(url))
        .collect::<Result<Vec<_>, _>>()?;

    for locator in &locators {
        state.loader.load_image(locator);
    }

    debug!(count = locators.len(), "Prefetch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(PrefetchAccepted {
            accepted: locators.len(),
        }),
    ))
}

/// Loader counters and sizes (GET /stats)
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let loader = &state.loader;
    Json(StatsResponse {
        loader: loader.name().to_string(),
        cached_images: loader.image_cache().map(|cache| cache.len()).unwrap_or(0),
        pending: loader.pending_count(),
        in_flight: loader.in_flight_count(),
        queued: loader.queued_count(),
        max_concurrent_loads: loader.maximum_concurrent_loads(),
        metrics: loader.metrics(),
    })
}

/// Pending request listing, oldest first (GET /pending)
pub async fn pending(State(state): State<AppState>) -> Json<PendingResponse> {
    Json(PendingResponse {
        requests: state.loader.pending(),
    })
}

/// Health check endpoint (GET /health)
///
/// Unhealthy once the served loader has been cleaned up.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let loaders = state.registry.loader_names();

    if state.loader.is_shut_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "loaders": loaders })),
        )
    } else {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "loaders": loaders })),
        )
    }
}
