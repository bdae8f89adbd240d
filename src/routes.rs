//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets X-Request-Id when missing
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Panic catcher   │ ← Sanitized 500 on handler panic
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Security pipeline│ ← /api routes only
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Liveness (outside the security pipeline)
//! - `/api/auth/register` - Registration, checked by the password policy
//! - `/api/account` - Profile with fields hidden by response masking

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::error_handler::handle_panic;
use crate::pipeline::SecurityPipeline;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    build_router_with(state.clone(), pipeline_for(&state))
}

/// Build the router around an already configured pipeline, e.g. one with a
/// custom audit sink.
pub fn build_router_with(state: AppState, pipeline: SecurityPipeline) -> Router {
    let config = &state.config;

    // =========================================================================
    // Protected API routes
    // =========================================================================
    let api = Router::new()
        .route("/api/auth/register", post(handlers::register))
        .route("/api/account", get(handlers::account_profile));
    let api = pipeline.apply(api);

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS (if configured)
    if let Some(cors) = &config.security.cors {
        info!(origins = ?cors.allowed_origins, "CORS enabled");
        router = router.layer(build_cors_layer(&cors.allowed_origins));
    }

    // 3. Panic catcher, 4. tracing, 5. request id
    router = router.layer(CatchPanicLayer::custom(handle_panic)).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    router.with_state(state)
}

fn pipeline_for(state: &AppState) -> SecurityPipeline {
    SecurityPipeline::new(state.config.security.clone(), state.cache.clone())
        .with_max_body_size(state.config.max_request_body_size)
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allow_any {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState::new(
            Config::default(),
            Cache::memory("routes", Duration::from_secs(60)),
        );
        build_router(state)
    }

    #[tokio::test]
    async fn test_request_id_is_generated_and_echoed() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_kept() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/account")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-123");
    }

    #[tokio::test]
    async fn test_health_bypasses_pipeline() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
        assert!(!response.headers().contains_key("x-frame-options"));
    }

    #[tokio::test]
    async fn test_cors_any_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "not a header\nvalue".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }
}
