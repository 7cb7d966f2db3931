use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::locator::LocatorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid locator: {0}")]
    InvalidLocator(#[from] LocatorError),
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("too many locators: {actual} (limit {limit})")]
    TooManyLocators { actual: usize, limit: usize },
    #[error("load cancelled: {0}")]
    Cancelled(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidLocator(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::TooManyLocators { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Cancelled(_) => StatusCode::CONFLICT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidLocator(_) => "INVALID_LOCATOR",
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::TooManyLocators { .. } => "TOO_MANY_LOCATORS",
            ApiError::Cancelled(_) => "CANCELLED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
