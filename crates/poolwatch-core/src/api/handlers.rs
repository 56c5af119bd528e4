//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::alerting::{AlertEvaluator, TestAlertRequest, TestAlertResponse};
use crate::error::Error;
use crate::models::{
    Alert, AlertRule, AlertRuleInput, AlertStatus, MaintenanceWindow, MaintenanceWindowInput,
    MetricSample,
};

const DEFAULT_ALERT_LIMIT: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<AlertEvaluator>,
}

/// Error body returned by every failing handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps crate errors onto HTTP status codes
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            other => {
                error!(error = %other, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rules: usize,
    pub channels: Vec<String>,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rules: state.evaluator.rules().len(),
        channels: state.evaluator.channels().names(),
    })
}

// --- Rules ---

pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<AlertRule>>> {
    Ok(Json(state.evaluator.list_rules().await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(input): Json<AlertRuleInput>,
) -> ApiResult<(StatusCode, Json<AlertRule>)> {
    let rule = state.evaluator.create_rule(input).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AlertRule>> {
    Ok(Json(state.evaluator.get_rule(id).await?))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<AlertRuleInput>,
) -> ApiResult<Json<AlertRule>> {
    Ok(Json(state.evaluator.update_rule(id, input).await?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.evaluator.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle request; flips the current state when `enabled` is omitted
#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    pub enabled: Option<bool>,
}

pub async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ToggleRequest>>,
) -> ApiResult<Json<AlertRule>> {
    let requested = body.and_then(|Json(req)| req.enabled);
    let enabled = match requested {
        Some(enabled) => enabled,
        None => !state.evaluator.get_rule(id).await?.enabled,
    };
    Ok(Json(state.evaluator.set_rule_enabled(id, enabled).await?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub condition: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check a condition without creating a rule
pub async fn validate_condition(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    let response = match state.evaluator.validate_condition(&req.condition) {
        Ok(condition) => ValidateResponse {
            valid: true,
            normalized: Some(condition.to_string()),
            error: None,
        },
        Err(e) => ValidateResponse {
            valid: false,
            normalized: None,
            error: Some(e.to_string()),
        },
    };
    Json(response)
}

// --- Alerts ---

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> ApiResult<Json<Vec<Alert>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AlertStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT);

    Ok(Json(state.evaluator.list_alerts(status, limit).await?))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.evaluator.resolve_alert(id).await?))
}

pub async fn test_alert(
    State(state): State<AppState>,
    body: Option<Json<TestAlertRequest>>,
) -> ApiResult<Json<TestAlertResponse>> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.evaluator.send_test_alert(&request).await?))
}

// --- Maintenance windows ---

pub async fn list_windows(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<MaintenanceWindow>>> {
    Ok(Json(state.evaluator.list_windows().await?))
}

pub async fn create_window(
    State(state): State<AppState>,
    Json(input): Json<MaintenanceWindowInput>,
) -> ApiResult<(StatusCode, Json<MaintenanceWindow>)> {
    let window = state.evaluator.create_window(input).await?;
    Ok((StatusCode::CREATED, Json(window)))
}

pub async fn delete_window(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.evaluator.delete_window(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Samples ---

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestSampleResponse {
    pub accepted: bool,
    pub evaluations: usize,
    pub transitions: usize,
}

/// Push one pool sample and evaluate it immediately
pub async fn ingest_sample(
    State(state): State<AppState>,
    Json(sample): Json<MetricSample>,
) -> ApiResult<(StatusCode, Json<IngestSampleResponse>)> {
    let summary = state.evaluator.record_sample(sample).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestSampleResponse {
            accepted: true,
            evaluations: summary.evaluations,
            transitions: summary.transitions,
        }),
    ))
}
