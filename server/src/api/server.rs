//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::middleware;
use super::routes::{events, health, metrics, pubsubs};
use crate::app::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;
use crate::pubsub::PubSubService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pubsub: Arc<PubSubService>,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);
        let state = AppState {
            pubsub: Arc::clone(&app.pubsub),
            shutdown_rx: shutdown.subscribe(),
        };

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Listening");

        axum::serve(listener, build_router(state))
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

/// Build the full route tree over the given state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/pubsubs", post(pubsubs::create))
        .route("/api/v1/pubsubs/{id}", delete(pubsubs::remove))
        .route(
            "/api/v1/pubsubs/{id}/events",
            post(pubsubs::publish).get(events::subscribe),
        )
        .route("/api/v1/metrics", get(metrics::metrics))
        .fallback(middleware::handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode, header};
    use futures::StreamExt;
    use tower::ServiceExt;

    use crate::core::config::{IdGenConfig, PubSubConfig, StaticPubSub};
    use crate::core::constants::{DEFAULT_IDGEN_EPOCH_SECS, DEFAULT_IDGEN_NODE_BITS};
    use crate::core::idgen::IdGen;
    use crate::pubsub::PubSubError;
    use crate::utils::base62;

    const API: &str = "api-token";
    const METRICS: &str = "metrics-token";

    fn test_state(statics: Vec<StaticPubSub>) -> (AppState, watch::Sender<bool>) {
        let config = PubSubConfig {
            api_access_token: API.to_string(),
            metrics_access_token: METRICS.to_string(),
            max_subscriber_receive_ms: 2_000,
            tick_secs: 30,
            static_pubsubs: statics,
        };
        let idgen = IdGen::new(&IdGenConfig {
            node: 1,
            epoch_time_in_seconds: DEFAULT_IDGEN_EPOCH_SECS,
            node_bits: DEFAULT_IDGEN_NODE_BITS,
        });
        let pubsub = Arc::new(PubSubService::init(&config, idgen, None).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            AppState {
                pubsub,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_topic(router: &Router) -> (String, String) {
        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/pubsubs",
                Some(API),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        (
            json["pubsub"]["id"].as_str().unwrap().to_string(),
            json["pubsub"]["token"].as_str().unwrap().to_string(),
        )
    }

    async fn next_frame(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("timed out waiting for an SSE frame")
            .expect("stream ended unexpectedly")
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(request("GET", "/api/v1/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_with_error_body() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(request("GET", "/api/v1/nope", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["message"], "Not found");
    }

    #[tokio::test]
    async fn test_create_returns_ids_and_token() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);
        let (id, token) = create_topic(&router).await;
        assert_eq!(id.len(), 11);
        assert_eq!(token.len(), 64);
        assert!(base62::decode_id(&id).is_some());
    }

    #[tokio::test]
    async fn test_create_without_body_succeeds() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(request("POST", "/api/v1/pubsubs", Some(API), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_create_auth_failures() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(request("POST", "/api/v1/pubsubs", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request("POST", "/api/v1/pubsubs", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], 401);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_payload() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/pubsubs")
                    .header(header::AUTHORIZATION, format!("Bearer {API}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Invalid request payload");
        assert_eq!(json["error"]["code"], 400);
    }

    #[tokio::test]
    async fn test_publish_requires_existing_topic() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);

        for id in ["99999999999", "not-base62!"] {
            let response = router
                .clone()
                .oneshot(request(
                    "POST",
                    &format!("/api/v1/pubsubs/{id}/events"),
                    Some(API),
                    Some(serde_json::json!({"event": {"message": "x"}})),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "id {id}");
        }
    }

    #[tokio::test]
    async fn test_publish_then_stream_delivers_data_frame() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);
        let (id, token) = create_topic(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/v1/pubsubs/{id}/events?access_token={token}"),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let mut body = response.into_body().into_data_stream();

        let publish = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/v1/pubsubs/{id}/events"),
                Some(API),
                Some(serde_json::json!({"event": {"message": "hi"}})),
            ))
            .await
            .unwrap();
        assert_eq!(publish.status(), StatusCode::CREATED);
        let json = body_json(publish).await;
        assert_eq!(json["event"]["id"].as_str().unwrap().len(), 11);

        assert_eq!(next_frame(&mut body).await, "data: hi\n\n");
    }

    #[tokio::test]
    async fn test_subscribe_wrong_token_is_401() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);
        let (id, _token) = create_topic(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/v1/pubsubs/{id}/events?access_token=wrong"),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request(
                "GET",
                &format!("/api/v1/pubsubs/{id}/events"),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_returns_204_even_when_absent() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);
        let (id, _token) = create_topic(&router).await;

        for target in [id, base62::encode_id(987_654)] {
            let response = router
                .clone()
                .oneshot(request(
                    "DELETE",
                    &format!("/api/v1/pubsubs/{target}"),
                    Some(API),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn test_delete_static_topic_is_rejected() {
        let (state, _shutdown) = test_state(vec![StaticPubSub {
            id: 1,
            name: "alerts".to_string(),
            token: "static-token".to_string(),
        }]);
        let router = build_router(state);

        let response = router
            .oneshot(request(
                "DELETE",
                &format!("/api/v1/pubsubs/{}", base62::encode_id(1)),
                Some(API),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "static pubsubs can't be deleted");
        assert_eq!(json["error"]["code"], 400);
    }

    #[tokio::test]
    async fn test_delete_during_subscription_sends_closed_frame() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state.clone());
        let (id, token) = create_topic(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/v1/pubsubs/{id}/events?access_token={token}"),
                None,
                None,
            ))
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();

        let response = router
            .oneshot(request(
                "DELETE",
                &format!("/api/v1/pubsubs/{id}"),
                Some(API),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert_eq!(
            next_frame(&mut body).await,
            "data: {\"status\": \"closed\"}\n\n"
        );
        // Stream ends after the closed frame.
        let end = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_detaches_subscriber() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state.clone());
        let (id, token) = create_topic(&router).await;

        let response = router
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/v1/pubsubs/{id}/events?access_token={token}"),
                None,
                None,
            ))
            .await
            .unwrap();

        let active = |metrics: Vec<crate::pubsub::MetricValue>| {
            metrics
                .into_iter()
                .find(|m| m.name == "active_subscribers")
                .unwrap()
                .value
        };
        let metrics = state.pubsub.metrics(METRICS.as_bytes()).unwrap();
        assert_eq!(active(metrics), 1);

        // Client goes away: dropping the response drops the stream, and the
        // driver's guard detaches the subscriber.
        drop(response);

        let metrics = state.pubsub.metrics(METRICS.as_bytes()).unwrap();
        assert_eq!(active(metrics), 0);
    }

    #[tokio::test]
    async fn test_cors_preflight_is_answered() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/v1/pubsubs/00000000001/events")
                    .header(header::ORIGIN, "http://example.com")
                    .header("Access-Control-Request-Method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://example.com"
        );
        assert_eq!(
            response.headers()["access-control-allow-credentials"],
            "true"
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(request("GET", "/api/v1/metrics", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request("GET", "/api/v1/metrics", Some(METRICS), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let metrics = json["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 7);
        let topics = metrics.iter().find(|m| m["name"] == "topics").unwrap();
        assert_eq!(topics["value"], 1);
    }

    #[tokio::test]
    async fn test_metrics_stream_mirrors_counter_changes() {
        let (state, _shutdown) = test_state(Vec::new());
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(request(
                "GET",
                &format!(
                    "/api/v1/pubsubs/{}/events?access_token={METRICS}",
                    base62::encode_id(0)
                ),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body().into_data_stream();

        create_topic(&router).await;

        // Two frames from the subscribe itself, two from the create.
        let mut seen = Vec::new();
        for _ in 0..4 {
            let frame = next_frame(&mut body).await;
            let payload = frame
                .strip_prefix("data: ")
                .unwrap()
                .strip_suffix("\n\n")
                .unwrap();
            let event: serde_json::Value = serde_json::from_str(payload).unwrap();
            assert_eq!(event["val"], 1);
            seen.push(event["metric"].as_str().unwrap().to_string());
        }
        seen.sort();
        assert_eq!(
            seen,
            vec!["active_subscribers", "active_topics", "subscribers", "topics"]
        );
    }

    #[tokio::test]
    async fn test_engine_error_passthrough_for_persist_without_recorder() {
        let (state, _shutdown) = test_state(Vec::new());
        let response = build_router(state)
            .oneshot(request(
                "POST",
                "/api/v1/pubsubs",
                Some(API),
                Some(serde_json::json!({"pubsub": {"persist": true}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], 400);
        assert_eq!(
            json["error"]["message"],
            PubSubError::BadRequest("persistence is not enabled".to_string()).to_string()
        );
    }
}
