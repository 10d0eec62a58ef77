//! Topic registry and fan-out engine
//!
//! Topics live in a concurrent map keyed by 64-bit id; each topic guards its
//! subscriber list with a reader/writer lock that is never held across an
//! await. Publishing snapshots the subscriber list under the read lock and
//! hands delivery to a background dispatch task, so publishers never block
//! on slow consumers; each per-subscriber send is bounded by the configured
//! receive window.
//!
//! Counter mutations are mirrored as JSON events onto the reserved metrics
//! topic (id 0) through an internal publish primitive that leaves the
//! message counters alone, which is what keeps the feedback loop from
//! recursing.

mod counters;
mod error;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

pub use counters::{Counters, Metric, MetricValue};
pub use error::PubSubError;

use crate::core::config::PubSubConfig;
use crate::core::constants::{METRICS_TOPIC_ID, TOPIC_TOKEN_LEN};
use crate::core::idgen::IdGen;
use crate::data::{Recorder, topic_id_from_key, topic_key};
use crate::utils::{base62, crypto};

/// Random material behind a generated topic token
const TOKEN_MATERIAL_BYTES: usize = 64;

/// One attached consumer: an id and the sending half of its conduit
struct Subscriber {
    id: i64,
    tx: mpsc::Sender<Vec<u8>>,
}

/// A single topic
struct Topic {
    id: i64,
    token: Vec<u8>,
    static_topic: bool,
    subscribers: RwLock<Vec<Subscriber>>,
}

/// Result of a successful `create`
#[derive(Debug)]
pub struct CreatedPubSub {
    pub id: i64,
    pub token: String,
}

/// Result of a successful `subscribe`
#[derive(Debug)]
pub struct Subscription {
    pub subscriber_id: i64,
    pub events: mpsc::Receiver<Vec<u8>>,
    pub tick: Duration,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Central pub/sub service: topic lifecycle, fan-out, counters
pub struct PubSubService {
    topics: DashMap<i64, Arc<Topic>>,
    counters: Counters,
    idgen: IdGen,
    recorder: Option<Arc<Recorder>>,
    api_token: Vec<u8>,
    metrics_token: Vec<u8>,
    receive_window: Duration,
    tick: Duration,
}

impl PubSubService {
    /// Build the service and register the startup topic set: the reserved
    /// metrics topic (id 0), every configured static topic, then whatever
    /// the recorder holds from previous runs.
    pub fn init(
        config: &PubSubConfig,
        idgen: IdGen,
        recorder: Option<Arc<Recorder>>,
    ) -> Result<Self, PubSubError> {
        let service = Self {
            topics: DashMap::new(),
            counters: Counters::new(),
            idgen,
            recorder,
            api_token: config.api_access_token.clone().into_bytes(),
            metrics_token: config.metrics_access_token.clone().into_bytes(),
            receive_window: Duration::from_millis(config.max_subscriber_receive_ms),
            tick: Duration::from_secs(config.tick_secs),
        };
        service.register_static(config)?;
        service.reload_persisted();
        Ok(service)
    }

    // ========================================================================
    // PUBLIC OPERATIONS
    // ========================================================================

    /// Create a new topic with a generated id and random token.
    pub fn create(&self, api_token: &[u8], persist: bool) -> Result<CreatedPubSub, PubSubError> {
        self.authorize_api(api_token)?;
        if persist && self.recorder.is_none() {
            return Err(PubSubError::BadRequest(
                "persistence is not enabled".to_string(),
            ));
        }

        let id = self.idgen.next();
        let token = generate_token()?;

        if persist && let Some(recorder) = &self.recorder {
            // Write-then-insert: a crash between the two re-registers the
            // topic on restart, which the persistence contract allows.
            recorder
                .set(&topic_key(id), token.as_bytes())
                .map_err(|e| PubSubError::Internal(format!("failed to persist pubsub: {e}")))?;
        }

        self.topics.insert(
            id,
            Arc::new(Topic {
                id,
                token: token.clone().into_bytes(),
                static_topic: false,
                subscribers: RwLock::new(Vec::new()),
            }),
        );
        self.bump(Metric::Topics, 1);
        self.bump(Metric::ActiveTopics, 1);
        tracing::debug!(topic_id = id, persist, "Pubsub created");

        Ok(CreatedPubSub { id, token })
    }

    /// Delete a topic, closing every subscriber channel.
    ///
    /// Deleting an absent topic succeeds; deleting a static topic fails.
    pub fn delete(&self, api_token: &[u8], id: i64) -> Result<(), PubSubError> {
        self.authorize_api(api_token)?;
        let Some(topic) = self.get_topic(id) else {
            return Ok(());
        };
        if topic.static_topic {
            return Err(PubSubError::BadRequest(
                "static pubsubs can't be deleted".to_string(),
            ));
        }

        if let Some(recorder) = &self.recorder {
            recorder.delete(&topic_key(id)).map_err(|e| {
                PubSubError::Internal(format!("failed to delete persisted pubsub: {e}"))
            })?;
        }

        let removed = {
            let mut subscribers = topic.subscribers.write();
            // Dropping the senders closes every subscriber channel; drivers
            // observe the close and emit their final frame.
            let removed = subscribers.drain(..).count() as i64;
            self.topics.remove(&id);
            removed
        };

        self.bump(Metric::ActiveTopics, -1);
        if removed > 0 {
            self.bump(Metric::ActiveSubscribers, -removed);
        }
        tracing::debug!(topic_id = topic.id, subscribers = removed, "Pubsub deleted");
        Ok(())
    }

    /// Publish a message to a topic.
    ///
    /// Returns as soon as the subscriber snapshot is taken and the dispatch
    /// task is enqueued; delivery is asynchronous. The returned id is a
    /// fresh event id.
    pub fn publish(&self, api_token: &[u8], id: i64, payload: Vec<u8>) -> Result<i64, PubSubError> {
        self.authorize_api(api_token)?;
        let attempted = self.publish_to(id, payload)?;
        let event_id = self.idgen.next();
        self.bump(Metric::MessageReceived, 1);
        // Attempted deliveries, not acknowledged ones: the divergence from
        // message_received is how slow consumers show up in the metrics.
        self.bump(Metric::MessageSent, attempted as i64);
        Ok(event_id)
    }

    /// Attach a subscriber to a topic.
    pub fn subscribe(&self, id: i64, token: &[u8]) -> Result<Subscription, PubSubError> {
        let topic = self.get_topic(id).ok_or(PubSubError::NotFound)?;
        if !crypto::constant_time_eq(&topic.token, token) {
            return Err(PubSubError::Unauthorized);
        }

        let subscriber_id = self.idgen.next();
        let (tx, rx) = mpsc::channel(1);
        topic.subscribers.write().push(Subscriber {
            id: subscriber_id,
            tx,
        });
        self.bump(Metric::Subscribers, 1);
        self.bump(Metric::ActiveSubscribers, 1);
        tracing::debug!(topic_id = id, subscriber_id, "Subscriber attached");

        Ok(Subscription {
            subscriber_id,
            events: rx,
            tick: self.tick,
        })
    }

    /// Detach a subscriber from a topic.
    ///
    /// The subscriber's channel is not closed here: the driver that called
    /// us owns the receiving side and has already stopped reading, while an
    /// in-flight dispatch may still hold a sender clone.
    pub fn unsubscribe(&self, id: i64, subscriber_id: i64, token: &[u8]) -> Result<(), PubSubError> {
        let topic = self.get_topic(id).ok_or(PubSubError::NotFound)?;
        if !crypto::constant_time_eq(&topic.token, token) {
            return Err(PubSubError::Unauthorized);
        }

        let removed = {
            let mut subscribers = topic.subscribers.write();
            match subscribers.iter().position(|s| s.id == subscriber_id) {
                Some(idx) => {
                    subscribers.swap_remove(idx);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bump(Metric::ActiveSubscribers, -1);
            tracing::debug!(topic_id = id, subscriber_id, "Subscriber detached");
        }
        Ok(())
    }

    /// Read all counters.
    pub fn metrics(&self, metrics_token: &[u8]) -> Result<Vec<MetricValue>, PubSubError> {
        if !crypto::constant_time_eq(&self.metrics_token, metrics_token) {
            return Err(PubSubError::Unauthorized);
        }
        Ok(self.counters.snapshot())
    }

    // ========================================================================
    // STARTUP REGISTRATION
    // ========================================================================

    fn register_static(&self, config: &PubSubConfig) -> Result<(), PubSubError> {
        self.topics.insert(
            METRICS_TOPIC_ID,
            Arc::new(Topic {
                id: METRICS_TOPIC_ID,
                token: self.metrics_token.clone(),
                static_topic: true,
                subscribers: RwLock::new(Vec::new()),
            }),
        );

        for st in &config.static_pubsubs {
            if st.id < 1 {
                return Err(PubSubError::BadRequest(format!(
                    "static pubsub '{}' must have id >= 1",
                    st.name
                )));
            }
            if st.token.is_empty() {
                return Err(PubSubError::BadRequest(format!(
                    "static pubsub '{}' must have a non-empty token",
                    st.name
                )));
            }
            self.topics.insert(
                st.id,
                Arc::new(Topic {
                    id: st.id,
                    token: st.token.clone().into_bytes(),
                    static_topic: true,
                    subscribers: RwLock::new(Vec::new()),
                }),
            );
            tracing::debug!(topic_id = st.id, name = %st.name, "Static pubsub registered");
        }

        let count = (1 + config.static_pubsubs.len()) as i64;
        self.bump(Metric::Topics, count);
        self.bump(Metric::ActiveTopics, count);
        self.bump(Metric::StaticTopics, count);
        Ok(())
    }

    /// Best-effort reload of persisted topics: individual bad records are
    /// logged and skipped.
    fn reload_persisted(&self) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let keys = match recorder.list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list persisted pubsubs");
                return;
            }
        };

        let mut loaded: i64 = 0;
        for key in keys {
            let Some(id) = topic_id_from_key(&key) else {
                tracing::warn!(key_len = key.len(), "Skipping malformed persisted key");
                continue;
            };
            let token = match recorder.get(&key) {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(topic_id = id, error = %e, "Skipping unreadable persisted pubsub");
                    continue;
                }
            };
            if self.topics.contains_key(&id) {
                tracing::warn!(topic_id = id, "Persisted pubsub collides with a static one, skipping");
                continue;
            }
            self.topics.insert(
                id,
                Arc::new(Topic {
                    id,
                    token,
                    static_topic: false,
                    subscribers: RwLock::new(Vec::new()),
                }),
            );
            loaded += 1;
        }

        if loaded > 0 {
            self.bump(Metric::Topics, loaded);
            self.bump(Metric::ActiveTopics, loaded);
            tracing::info!(count = loaded, "Persisted pubsubs reloaded");
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn authorize_api(&self, api_token: &[u8]) -> Result<(), PubSubError> {
        if crypto::constant_time_eq(&self.api_token, api_token) {
            Ok(())
        } else {
            Err(PubSubError::Unauthorized)
        }
    }

    fn get_topic(&self, id: i64) -> Option<Arc<Topic>> {
        self.topics.get(&id).map(|t| Arc::clone(&t))
    }

    /// Internal publish primitive: snapshot, enqueue dispatch, return the
    /// number of attempted deliveries. Touches no counters — the metric
    /// mirror uses this directly to avoid recursing into itself.
    fn publish_to(&self, id: i64, payload: Vec<u8>) -> Result<usize, PubSubError> {
        let topic = self.get_topic(id).ok_or(PubSubError::NotFound)?;
        let snapshot: Vec<(i64, mpsc::Sender<Vec<u8>>)> = {
            let subscribers = topic.subscribers.read();
            subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
        };
        let attempted = snapshot.len();
        self.dispatch(id, snapshot, payload);
        Ok(attempted)
    }

    /// Deliver one message to a subscriber snapshot, all sends concurrently,
    /// each bounded by the receive window. A subscriber that misses the
    /// window loses this message only; it stays registered.
    fn dispatch(&self, topic_id: i64, snapshot: Vec<(i64, mpsc::Sender<Vec<u8>>)>, payload: Vec<u8>) {
        if snapshot.is_empty() {
            return;
        }
        // Dispatch needs a runtime; during process teardown there is none.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let window = self.receive_window;
        handle.spawn(async move {
            let sends = snapshot.into_iter().map(|(subscriber_id, tx)| {
                let payload = payload.clone();
                async move {
                    match tokio::time::timeout(window, tx.send(payload)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => {
                            tracing::debug!(
                                topic_id,
                                subscriber_id,
                                "Subscriber channel closed before delivery"
                            );
                        }
                        Err(_) => {
                            tracing::warn!(
                                topic_id,
                                subscriber_id,
                                window_ms = window.as_millis() as u64,
                                "Subscriber did not accept message within the receive window"
                            );
                        }
                    }
                }
            });
            futures::future::join_all(sends).await;
        });
    }

    /// Mutate a counter, first mirroring the change as a JSON event onto the
    /// reserved metrics topic. Mirror failures are swallowed.
    fn bump(&self, metric: Metric, delta: i64) {
        let payload = format!(r#"{{"val": {}, "metric": "{}"}}"#, delta, metric.as_str());
        if let Err(e) = self.publish_to(METRICS_TOPIC_ID, payload.into_bytes()) {
            tracing::debug!(error = %e, "Metrics mirror publish dropped");
        }
        self.counters.add(metric, delta);
    }
}

/// Generate a topic token: 64 random bytes read as one big base-62 integer,
/// truncated to [`TOPIC_TOKEN_LEN`] characters.
fn generate_token() -> Result<String, PubSubError> {
    let raw = crypto::random_bytes(TOKEN_MATERIAL_BYTES)
        .map_err(|e| PubSubError::Internal(format!("token generation failed: {e}")))?;
    let mut token = base62::encode_bytes(&raw);
    token.truncate(TOPIC_TOKEN_LEN);
    // 64 random bytes encode to ~86 digits, so padding never happens in
    // practice; it keeps the width invariant unconditional.
    while token.len() < TOPIC_TOKEN_LEN {
        token.insert(0, '0');
    }
    Ok(token)
}
