//! Topic management and publish endpoints

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::super::auth::bearer_token;
use super::super::server::AppState;
use super::super::types::ApiError;
use crate::utils::base62;

#[derive(Debug, Default, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub pubsub: Option<CreateOptions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateOptions {
    #[serde(default)]
    pub persist: bool,
}

#[derive(Serialize)]
struct PubSubBody {
    id: String,
    token: String,
}

#[derive(Serialize)]
struct CreateResponse {
    pubsub: PubSubBody,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub event: PublishEvent,
}

/// Publish body. Optional SSE framing hints (`id`, `type`) are accepted but
/// not echoed; only the message value travels.
#[derive(Debug, Deserialize)]
pub struct PublishEvent {
    pub message: serde_json::Value,
}

#[derive(Serialize)]
struct EventBody {
    id: String,
}

#[derive(Serialize)]
struct PublishResponse {
    event: EventBody,
}

/// `POST /api/v1/pubsubs` — create a topic
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;

    // The body is optional: no body at all means no options.
    let persist = match body {
        Ok(Json(request)) => request.pubsub.map(|p| p.persist).unwrap_or(false),
        Err(JsonRejection::MissingJsonContentType(_)) => false,
        Err(_) => return Err(ApiError::invalid_payload()),
    };

    let created = state.pubsub.create(token.as_bytes(), persist)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            pubsub: PubSubBody {
                id: base62::encode_id(created.id),
                token: created.token,
            },
        }),
    ))
}

/// `DELETE /api/v1/pubsubs/{id}` — delete a topic
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;
    state.pubsub.delete(token.as_bytes(), decode_topic_id(&id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/pubsubs/{id}/events` — publish a message
pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;
    let Json(request) = body.map_err(|_| ApiError::invalid_payload())?;

    let payload = event_payload(&request.event.message)?;
    let event_id = state
        .pubsub
        .publish(token.as_bytes(), decode_topic_id(&id), payload)?;

    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            event: EventBody {
                id: base62::encode_id(event_id),
            },
        }),
    ))
}

/// Decode a path id; anything malformed becomes -1, which no topic ever
/// owns, so lookups fall through to not-found.
pub(crate) fn decode_topic_id(raw: &str) -> i64 {
    base62::decode_id(raw).unwrap_or(-1)
}

/// A string message travels as its raw text; everything else travels as its
/// JSON serialization.
fn event_payload(message: &serde_json::Value) -> Result<Vec<u8>, ApiError> {
    match message {
        serde_json::Value::String(s) => Ok(s.clone().into_bytes()),
        other => serde_json::to_vec(other).map_err(|e| ApiError::internal(e.to_string())),
    }
}
