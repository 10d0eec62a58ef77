//! Shared API types
//!
//! The error body shape is the same for every failure:
//! `{"error": {"code": <int>, "message": <string>, "details": <object>}}`,
//! with `details` present only when there is something structured to say.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::pubsub::PubSubError;

/// Standard API error response
#[derive(Debug)]
pub struct ApiError {
    code: u16,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            code: 401,
            message: "invalid access token".to_string(),
            details: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            code: 404,
            message: "Not found".to_string(),
            details: None,
        }
    }

    pub fn invalid_payload() -> Self {
        Self {
            code: 400,
            message: "Invalid request payload".to_string(),
            details: None,
        }
    }

    /// Non-engine failure surfaced as a 500 with the cause in `details`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: "Internal server error".to_string(),
            details: Some(json!({ "error": message.into() })),
        }
    }
}

impl From<PubSubError> for ApiError {
    fn from(err: PubSubError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}
