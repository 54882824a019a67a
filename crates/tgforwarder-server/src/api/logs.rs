//! Delivery log endpoints.
//!
//! Provides:
//! - GET /api/logs - Most recent delivery attempts, optionally for one rule

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use tgforwarder_core::DeliveryLogRepository;

use super::{ApiError, page_size};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_logs))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogListParams {
    pub rule_id: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/logs
///
/// Query parameters:
/// - `rule_id`: only entries for this rule
/// - `limit`: page size, default 100, capped at 500
async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogListParams>,
) -> impl IntoResponse {
    let repo = DeliveryLogRepository::new(state.db.clone());

    match repo
        .list(params.rule_id.as_deref(), page_size(params.limit))
        .await
    {
        Ok(logs) => (StatusCode::OK, Json(logs)).into_response(),
        Err(e) => {
            tracing::error!("Failed to list delivery logs: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::internal("Failed to list delivery logs")),
            )
                .into_response()
        }
    }
}
