//! Metrics endpoint

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;

use super::super::auth::bearer_token;
use super::super::server::AppState;
use super::super::types::ApiError;
use crate::pubsub::MetricValue;

#[derive(Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<MetricValue>,
}

/// `GET /api/v1/metrics` — read all counters
pub async fn metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;
    let metrics = state.pubsub.metrics(token.as_bytes())?;
    Ok(Json(MetricsResponse { metrics }))
}
