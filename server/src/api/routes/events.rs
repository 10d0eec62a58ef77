//! SSE subscription endpoint
//!
//! One driver loop per connection: forwards topic messages, writes periodic
//! heartbeat frames, and detaches the subscriber when the client goes away.
//! The registry closes the channel on topic deletion, which the loop turns
//! into a final `closed` frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use serde::Deserialize;

use super::super::auth::bearer_token;
use super::super::server::AppState;
use super::super::types::ApiError;
use super::pubsubs::decode_topic_id;
use crate::pubsub::PubSubService;

/// Frame written on every heartbeat tick
const TICK_FRAME: &str = r#"{"status": "tick"}"#;

/// Final frame when the topic is deleted under a live stream
const CLOSED_FRAME: &str = r#"{"status": "closed"}"#;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// Token fallback for browser `EventSource` clients, which cannot set
    /// the Authorization header
    pub access_token: Option<String>,
}

/// `GET /api/v1/pubsubs/{id}/events` — attach an SSE subscriber
pub async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = bearer_token(&headers)
        .map(str::to_owned)
        .or(query.access_token)
        .ok_or_else(ApiError::unauthorized)?;
    let topic_id = decode_topic_id(&id);

    let mut subscription = state.pubsub.subscribe(topic_id, token.as_bytes())?;
    let mut shutdown_rx = state.shutdown_rx.clone();
    let guard = DetachGuard {
        service: Arc::clone(&state.pubsub),
        topic_id,
        subscriber_id: subscription.subscriber_id,
        token: token.into_bytes(),
        armed: true,
    };

    let stream = async_stream::stream! {
        let mut guard = guard;
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + subscription.tick,
            subscription.tick,
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    // A dropped sender means the application is tearing down.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    yield Ok(Event::default().data(TICK_FRAME));
                }
                message = subscription.events.recv() => {
                    match message {
                        Some(payload) => yield Ok(message_event(&payload)),
                        None => {
                            // Topic deleted: the registry already dropped
                            // this subscriber, nothing left to detach.
                            guard.armed = false;
                            yield Ok(Event::default().data(CLOSED_FRAME));
                            break;
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream))
}

/// Build the SSE frame for a message payload.
///
/// Payloads travel as UTF-8 text. Carriage returns cannot appear in an SSE
/// field value and are stripped.
fn message_event(payload: &[u8]) -> Event {
    let text = String::from_utf8_lossy(payload);
    if text.contains('\r') {
        Event::default().data(text.replace('\r', ""))
    } else {
        Event::default().data(text)
    }
}

/// Best-effort unsubscribe when the stream is dropped: client close and
/// flush failure both end here. Disarmed when the topic itself is gone.
struct DetachGuard {
    service: Arc<PubSubService>,
    topic_id: i64,
    subscriber_id: i64,
    token: Vec<u8>,
    armed: bool,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) =
                self.service
                    .unsubscribe(self.topic_id, self.subscriber_id, &self.token)
        {
            tracing::debug!(
                topic_id = self.topic_id,
                subscriber_id = self.subscriber_id,
                error = %e,
                "Best-effort detach failed"
            );
        }
    }
}
