//! Security response headers.
//!
//! The header set for a path is the baseline hardening set (when enabled)
//! merged with the configured custom headers, custom entries winning on a
//! name clash. It is computed once per distinct path, cached for an hour
//! under `security-headers:<path>` and replayed verbatim from the cache
//! afterwards. Any cache failure, or a header that cannot be encoded, fails
//! the request with `SECURITY_HEADER_ERROR`; a response never silently
//! leaves without its headers.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::BoxError;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};

use crate::cache::{Cache, CacheCategory, CacheKey};
use crate::config::SecurityConfig;
use crate::error::{SecurityError, SecurityErrorCode};

/// How long a composed header set is cached per path.
pub const HEADER_SET_TTL: Duration = Duration::from_secs(3600);

/// Hardening headers applied when the baseline set is enabled.
pub const BASELINE_HEADERS: [(&str, &str); 12] = [
    ("content-security-policy", "default-src 'self'"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    (
        "strict-transport-security",
        "max-age=15552000; includeSubDomains",
    ),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

pub type HeaderSet = BTreeMap<String, String>;

/// Builds and caches the header set for each path.
#[derive(Debug, Clone)]
pub struct HeaderComposer {
    cache: Cache,
    baseline: bool,
    custom: Arc<HeaderSet>,
}

impl HeaderComposer {
    pub fn new(cache: Cache, baseline: bool, custom: &BTreeMap<String, String>) -> Self {
        let custom = custom
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        Self {
            cache,
            baseline,
            custom: Arc::new(custom),
        }
    }

    /// Merge the baseline set with the custom headers.
    pub fn compose(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        if self.baseline {
            for (name, value) in BASELINE_HEADERS {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        headers.extend(self.custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }

    /// Header set for `path`, from the cache when present.
    ///
    /// # Errors
    ///
    /// Returns `SECURITY_HEADER_ERROR` if the cache cannot be read or written.
    pub async fn headers_for(&self, path: &str) -> Result<HeaderSet, SecurityError> {
        let key = CacheKey::new(CacheCategory::SecurityHeaders, path);

        let cached = self
            .cache
            .get::<HeaderSet>(&key)
            .await
            .map_err(|e| header_error(path, "Failed to read security headers", e))?;
        if let Some(headers) = cached {
            return Ok(headers);
        }

        let headers = self.compose();
        self.cache
            .set(&key, &headers, Some(HEADER_SET_TTL))
            .await
            .map_err(|e| header_error(path, "Failed to store security headers", e))?;
        Ok(headers)
    }
}

fn header_error(path: &str, message: &str, cause: impl std::fmt::Display) -> SecurityError {
    SecurityError::new(SecurityErrorCode::SecurityHeaderError, message)
        .with_path(path)
        .with_internal("cause", cause.to_string())
}

/// Encode `headers` into `target`, replacing existing values.
///
/// # Errors
///
/// Returns `SECURITY_HEADER_ERROR` for a name or value HTTP cannot carry.
pub fn apply_headers(
    target: &mut HeaderMap,
    headers: &HeaderSet,
    path: &str,
) -> Result<(), SecurityError> {
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| header_error(path, "Invalid security header name", e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| header_error(path, "Invalid security header value", e))?;
        target.insert(name, value);
    }
    Ok(())
}

#[derive(Clone)]
pub struct SecurityHeadersLayer {
    composer: HeaderComposer,
}

impl SecurityHeadersLayer {
    pub fn new(cache: Cache, config: &SecurityConfig) -> Self {
        Self {
            composer: HeaderComposer::new(cache, config.helmet, &config.headers),
        }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            composer: self.composer.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    composer: HeaderComposer,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let composer = self.composer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let headers = composer.headers_for(&path).await?;

            let mut response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
            apply_headers(response.headers_mut(), &headers, &path)?;
            Ok::<_, BoxError>(response)
        })
    }
}
