//! HTTP middleware (CORS, 404 handler)

use axum::http::{Method, header};
use axum::response::IntoResponse;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::types::ApiError;

/// Permissive CORS reflecting the request origin, with credentials.
///
/// Browser `EventSource` clients attach from arbitrary origins; reflecting
/// the origin (rather than `*`) is what keeps credentialed requests legal.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
        ])
        .allow_credentials(true)
}

/// Handle 404 Not Found
pub async fn handle_404() -> impl IntoResponse {
    ApiError::not_found()
}
