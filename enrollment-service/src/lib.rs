pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::EnrollmentConfig;
use crate::services::{EnrollmentNotifier, TokenService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EnrollmentConfig>,
    pub tokens: TokenService,
    pub notifier: EnrollmentNotifier,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/tokens",
            post(handlers::tokens::create_token).get(handlers::tokens::list_tokens),
        )
        .route("/api/tokens/:username", get(handlers::tokens::get_token))
        .route(
            "/api/tokens/:username/revoke",
            post(handlers::tokens::revoke_token),
        )
        .route("/api/tokens/:username/qr", get(handlers::tokens::qr_code))
        .route(
            "/api/tokens/:username/package",
            get(handlers::tokens::download_package).post(handlers::tokens::rebuild_package),
        )
        .route("/api/stats", get(handlers::tokens::get_statistics));

    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(api)
        .with_state(state)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-request-id"),
        ])
}
