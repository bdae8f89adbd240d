//! Per-client fixed-window rate limiting over the shared cache.
//!
//! # Algorithm
//!
//! Time is cut into windows of `window_ms`. A request from client `c` at
//! time `now` lands in bucket `floor(now / window_ms)` and atomically
//! increments the counter stored under `rate-limit:c:bucket`, which expires
//! with the window. The request is rejected when the incremented count
//! exceeds the configured maximum. A new bucket starts from zero, so limits
//! reset when the window rolls over.
//!
//! # Rejection Modes
//!
//! - [`RejectionMode::Respond`]: the layer answers 429 itself with
//!   `{"error": "Too many requests"}` and a `Retry-After` header
//! - [`RejectionMode::Forward`]: the layer fails the request with a
//!   `RATE_LIMIT_EXCEEDED` [`SecurityError`] for the terminal error handler
//!
//! Cache failures are always forwarded as `CACHE_ERROR`; the limiter never
//! guesses when its backing store is unavailable. With the cache disabled
//! every request is allowed and no counters are kept.
//!
//! # Response Headers
//!
//! - `X-RateLimit-Limit`: Maximum requests per window
//! - `X-RateLimit-Remaining`: Requests left in the current window
//! - `X-RateLimit-Reset`: Seconds until the current window ends
//! - `Retry-After`: On direct 429 responses only

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::BoxError;
use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};
use crate::cache::{Cache, CacheCategory, CacheKey};
use crate::config::RateLimitConfig;
use crate::error::{CacheError, SecurityError, SecurityErrorCode};
use crate::metrics;

/// How a limited request is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionMode {
    /// Answer 429 directly.
    #[default]
    Respond,
    /// Fail with `RATE_LIMIT_EXCEEDED` through the error channel.
    Forward,
}

impl FromStr for RejectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "respond" => Ok(RejectionMode::Respond),
            "forward" => Ok(RejectionMode::Forward),
            other => Err(format!(
                "unknown rate limit mode '{other}' (expected respond|forward)"
            )),
        }
    }
}

type MaxFuture = Pin<Box<dyn Future<Output = u64> + Send>>;

/// Per-request maximum, evaluated once per request.
#[derive(Clone)]
pub enum MaxRequests {
    Fixed(u64),
    Dynamic(Arc<dyn Fn(&Request<Body>) -> MaxFuture + Send + Sync>),
}

impl MaxRequests {
    /// Compute the maximum from the request, e.g. per-plan quotas.
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(&Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = u64> + Send + 'static,
    {
        MaxRequests::Dynamic(Arc::new(move |req| Box::pin(f(req))))
    }

    fn resolve(&self, req: &Request<Body>) -> MaxFuture {
        match self {
            MaxRequests::Fixed(max) => {
                let max = *max;
                Box::pin(async move { max })
            }
            MaxRequests::Dynamic(f) => f(req),
        }
    }
}

impl fmt::Debug for MaxRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxRequests::Fixed(max) => f.debug_tuple("Fixed").field(max).finish(),
            MaxRequests::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<u64> for MaxRequests {
    fn from(max: u64) -> Self {
        MaxRequests::Fixed(max)
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_after: Duration,
    },
    Limited {
        limit: u64,
        retry_after: Duration,
    },
    /// Cache disabled; nothing was counted.
    Untracked,
}

/// Fixed-window counter keyed by client identifier.
#[derive(Debug, Clone)]
pub struct WindowCounter {
    cache: Cache,
    window_ms: u64,
}

impl WindowCounter {
    /// A zero window is clamped to one millisecond.
    pub fn new(cache: Cache, window: Duration) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        Self { cache, window_ms }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Bucket index containing `now_ms`.
    pub fn bucket(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms
    }

    /// Count a request from `client` at `now_ms` against `max`.
    ///
    /// # Errors
    ///
    /// Returns the underlying `CacheError` if the counter cannot be updated.
    pub async fn hit(&self, client: &str, now_ms: u64, max: u64) -> Result<RateDecision, CacheError> {
        let bucket = i64::try_from(self.bucket(now_ms)).unwrap_or(i64::MAX);
        let key = CacheKey::new(CacheCategory::RateLimit, client).with_bucket(bucket);
        let window = Duration::from_millis(self.window_ms);

        let Some(count) = self.cache.increment(&key, window).await? else {
            return Ok(RateDecision::Untracked);
        };

        let reset_after = Duration::from_millis(self.window_ms - now_ms % self.window_ms);
        if count > max {
            Ok(RateDecision::Limited {
                limit: max,
                retry_after: reset_after,
            })
        } else {
            Ok(RateDecision::Allowed {
                limit: max,
                remaining: max - count,
                reset_after,
            })
        }
    }
}

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(cache, &config.security.rate_limit.unwrap());
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(HandleErrorLayer::new(handle_error))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    counter: WindowCounter,
    max: MaxRequests,
    mode: RejectionMode,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(cache: Cache, config: &RateLimitConfig) -> Self {
        Self {
            counter: WindowCounter::new(cache, config.window()),
            max: MaxRequests::Fixed(config.max),
            mode: config.mode,
            trusted_proxies: Arc::new(TrustedProxyConfig::new(&config.trusted_proxies)),
        }
    }

    /// Replace the configured fixed maximum.
    pub fn with_max(mut self, max: impl Into<MaxRequests>) -> Self {
        self.max = max.into();
        self
    }

    pub fn with_mode(mut self, mode: RejectionMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            counter: self.counter.clone(),
            max: self.max.clone(),
            mode: self.mode,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    counter: WindowCounter,
    max: MaxRequests,
    mode: RejectionMode,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let counter = self.counter.clone();
        let mode = self.mode;
        let mut inner = self.inner.clone();

        let client_ip = extract_client_ip_with_validation(&req, &self.trusted_proxies).into_owned();
        let max = self.max.resolve(&req);

        Box::pin(async move {
            let max = max.await;
            let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);

            let decision = match counter.hit(&client_ip, now_ms, max).await {
                Ok(decision) => decision,
                Err(e) => {
                    let err = SecurityError::from(e)
                        .with_path(req.uri().path())
                        .with_client(client_ip);
                    return Err(BoxError::from(err));
                }
            };

            match decision {
                RateDecision::Untracked => inner.call(req).await.map_err(Into::<BoxError>::into),
                RateDecision::Allowed {
                    limit,
                    remaining,
                    reset_after,
                } => {
                    let mut response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
                    insert_limit_headers(response.headers_mut(), limit, remaining, reset_after);
                    Ok(response)
                }
                RateDecision::Limited { limit, retry_after } => {
                    let retry_after_secs = ceil_secs(retry_after);
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        limit,
                        retry_after_secs,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limit_rejection();

                    match mode {
                        RejectionMode::Respond => {
                            let mut response = (
                                StatusCode::TOO_MANY_REQUESTS,
                                Json(json!({ "error": "Too many requests" })),
                            )
                                .into_response();
                            let headers = response.headers_mut();
                            insert_limit_headers(headers, limit, 0, retry_after);
                            headers.insert("retry-after", HeaderValue::from(retry_after_secs));
                            Ok(response)
                        }
                        RejectionMode::Forward => {
                            let err = SecurityError::new(
                                SecurityErrorCode::RateLimitExceeded,
                                "Too many requests",
                            )
                            .with_path(req.uri().path())
                            .with_client(client_ip)
                            .with_details(json!({
                                "limit": limit,
                                "retryAfter": retry_after_secs,
                            }));
                            Err(BoxError::from(err))
                        }
                    }
                }
            }
        })
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_millis().div_ceil(1000).try_into().unwrap_or(u64::MAX).max(1)
}

fn insert_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_after: Duration) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(ceil_secs(reset_after)));
}
