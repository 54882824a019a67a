//! HTTP API for managing forwarding rules and reading the delivery log.

pub mod logs;
pub mod rules;

use axum::Router;
use serde::Serialize;

use crate::AppState;

/// Create the API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/rules", rules::router())
        .nest("/logs", logs::router())
}

/// Error response body shared by all endpoints.
#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    error: String,
    message: String,
}

impl ApiError {
    fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

pub(crate) const DEFAULT_PAGE_SIZE: u32 = 100;
pub(crate) const MAX_PAGE_SIZE: u32 = 500;

pub(crate) fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
