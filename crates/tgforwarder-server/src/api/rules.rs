//! Rules API endpoints.
//!
//! Provides:
//! - GET /api/rules - List rules (`offset`, `limit`)
//! - POST /api/rules - Create a rule
//! - GET /api/rules/:id - Get a rule by ID
//! - PATCH /api/rules/:id - Update a rule
//! - DELETE /api/rules/:id - Delete a rule
//! - POST /api/rules/test - Evaluate a stored rule or an ad-hoc filter against sample text

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tgforwarder_core::rules::{
    AiConfig, DeliveryMethod, FilterSpec, NewRule, RuleError, RuleRepository,
};

use super::{ApiError, page_size};
use crate::AppState;

/// Create the rules API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route("/test", post(test_rule))
        .route(
            "/{id}",
            get(get_rule).patch(update_rule).delete(delete_rule),
        )
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::not_found(format!("Rule not found: {}", id))),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::bad_request(message))).into_response()
}

fn internal(action: &str, e: RuleError) -> Response {
    tracing::error!("Failed to {}: {}", action, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::internal(format!("Failed to {}", action))),
    )
        .into_response()
}

/// Normalize and validate a rule before it is written.
fn prepare(rule: NewRule) -> Result<NewRule, Response> {
    let rule = rule.normalized().map_err(|e| bad_request(e.to_string()))?;
    FilterSpec::from_json(rule.filters.as_ref())
        .validate()
        .map_err(|e| bad_request(format!("Invalid filters: {}", e)))?;
    Ok(rule)
}

#[derive(Debug, Default, Deserialize)]
pub struct RuleListParams {
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// GET /api/rules
async fn list_rules(
    State(state): State<AppState>,
    Query(params): Query<RuleListParams>,
) -> impl IntoResponse {
    let repo = RuleRepository::new(state.db.clone());

    match repo
        .list(params.offset.unwrap_or(0), page_size(params.limit))
        .await
    {
        Ok(rules) => (StatusCode::OK, Json(rules)).into_response(),
        Err(e) => internal("list rules", e),
    }
}

/// GET /api/rules/:id
async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let repo = RuleRepository::new(state.db.clone());

    match repo.get_by_id(&id).await {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(RuleError::NotFound(_)) => not_found(&id),
        Err(e) => internal("get rule", e),
    }
}

/// Request body for creating a rule.
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    /// Logic tree or legacy keyword filter. Absent or null matches everything.
    pub filters: Option<Value>,
    /// Defaults to forward.
    pub delivery_method: Option<DeliveryMethod>,
    /// Defaults to true.
    pub is_active: Option<bool>,
    pub ai_config: Option<AiConfig>,
}

/// POST /api/rules
async fn create_rule(
    State(state): State<AppState>,
    Json(body): Json<CreateRuleRequest>,
) -> impl IntoResponse {
    let new_rule = match prepare(NewRule {
        name: body.name,
        source: body.source,
        destination: body.destination,
        filters: body.filters,
        delivery_method: body.delivery_method.unwrap_or_default(),
        is_active: body.is_active.unwrap_or(true),
        ai_config: body.ai_config,
    }) {
        Ok(rule) => rule,
        Err(response) => return response,
    };

    let repo = RuleRepository::new(state.db.clone());
    match repo.create(new_rule).await {
        Ok(rule) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(e) => internal("create rule", e),
    }
}

mod nullable {
    use serde::{Deserialize, Deserializer};

    /// `Some(None)` for explicit null, `Some(Some(value))` for a value.
    /// Absent fields fall back to serde's default of `None`.
    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }
}

/// Request body for updating a rule. Absent fields keep their stored value;
/// nullable fields are cleared by sending null.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRuleRequest {
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub name: Option<Option<String>>,
    pub source: Option<String>,
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub filters: Option<Option<Value>>,
    pub delivery_method: Option<DeliveryMethod>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub ai_config: Option<Option<AiConfig>>,
}

/// PATCH /api/rules/:id
async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateRuleRequest>,
) -> impl IntoResponse {
    let repo = RuleRepository::new(state.db.clone());

    let existing = match repo.get_by_id(&id).await {
        Ok(rule) => rule,
        Err(RuleError::NotFound(_)) => return not_found(&id),
        Err(e) => return internal("fetch rule", e),
    };

    let merged = NewRule {
        name: body.name.unwrap_or(existing.name),
        source: body.source.unwrap_or(existing.source),
        destination: body.destination.unwrap_or(existing.destination),
        filters: body.filters.unwrap_or(existing.filters),
        delivery_method: body.delivery_method.unwrap_or(existing.delivery_method),
        is_active: body.is_active.unwrap_or(existing.is_active),
        ai_config: body.ai_config.unwrap_or(existing.ai_config),
    };
    let merged = match prepare(merged) {
        Ok(rule) => rule,
        Err(response) => return response,
    };

    match repo.update(&id, merged).await {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(RuleError::NotFound(_)) => not_found(&id),
        Err(e) => internal("update rule", e),
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeleteResponse {
    pub ok: bool,
}

/// DELETE /api/rules/:id
///
/// Delivery log entries for the rule are kept with their rule reference cleared.
async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let repo = RuleRepository::new(state.db.clone());

    match repo.delete(&id).await {
        Ok(()) => (StatusCode::OK, Json(DeleteResponse { ok: true })).into_response(),
        Err(RuleError::NotFound(_)) => not_found(&id),
        Err(e) => internal("delete rule", e),
    }
}

/// Request body for a dry-run evaluation. Uses the stored rule's filters when
/// `rule_id` is given, otherwise `filters` from the request.
#[derive(Debug, Deserialize)]
pub struct TestRuleRequest {
    pub rule_id: Option<String>,
    pub filters: Option<Value>,
    #[serde(default)]
    pub message_text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TestRuleResponse {
    pub matches: bool,
    pub rule_id: Option<String>,
    pub message_text: String,
}

/// POST /api/rules/test
async fn test_rule(
    State(state): State<AppState>,
    Json(body): Json<TestRuleRequest>,
) -> impl IntoResponse {
    let filters = match (&body.rule_id, body.filters) {
        (Some(id), _) => {
            let repo = RuleRepository::new(state.db.clone());
            match repo.get_by_id(id).await {
                Ok(rule) => rule.filters,
                Err(RuleError::NotFound(_)) => return not_found(id),
                Err(e) => return internal("fetch rule", e),
            }
        }
        (None, Some(filters)) => Some(filters),
        (None, None) => return bad_request("Either rule_id or filters is required"),
    };

    let matches = FilterSpec::from_json(filters.as_ref()).matches(&body.message_text);

    (
        StatusCode::OK,
        Json(TestRuleResponse {
            matches,
            rule_id: body.rule_id,
            message_text: body.message_text,
        }),
    )
        .into_response()
}
