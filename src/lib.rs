//! # Compliance Guard
//!
//! Security-compliance middleware for Axum services, featuring:
//!
//! - **Rate limiting**: fixed-window counters per client over a shared cache
//! - **Password policy**: registration bodies checked against configurable rules
//! - **Security headers**: hardening baseline plus custom overrides
//! - **Audit logging**: one structured record per request, deduplicated
//! - **Data protection**: sensitive JSON fields masked in responses
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Outer layers (Request ID → Trace → Panic catch → CORS)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SecurityPipeline                                           │
//! │  (Errors → Rate → Password → Headers → Audit → Masking)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers                                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cache (memory | Redis)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use compliance_guard::{Cache, Config, SecurityPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let cache = Cache::from_config(&config.cache).await?;
//!
//!     let app = SecurityPipeline::new(config.security.clone(), cache)
//!         .apply(Router::new().route("/api", get(|| async { "ok" })));
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Switch the limiter to a shared Redis store:
//! ```bash
//! CACHE_STORE=redis REDIS_HOST=localhost RATE_LIMIT_MAX=50 cargo run
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod policy;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use cache::{Cache, CacheCategory, CacheKey, CacheStore};
pub use config::{Config, SecurityConfig};
pub use error::{CacheError, ConfigError, SecurityError, SecurityErrorCode};
pub use pipeline::SecurityPipeline;
pub use policy::{PasswordPolicy, validate_password};
pub use routes::build_router;
pub use state::AppState;
