//! Structured audit records with per-minute deduplication.
//!
//! One record is emitted per `METHOD:path` per minute. The dedup marker lives
//! in the cache under `audit-log:METHOD\:path:<minute>` and is claimed before
//! the handler runs; the record itself is emitted after the response exists
//! so it carries the final status. A request that fails downstream is still
//! recorded, with the status the error handler will answer with, so a
//! claimed bucket never ends up without a record.
//!
//! Request body fields are flattened into the record. Fields listed in
//! `exclude_fields` are dropped, fields in `mask_fields` keep their key but
//! lose their value, and body keys that collide with the record's own keys
//! are discarded.
//!
//! A cache failure while claiming the marker fails the request with
//! `AUDIT_LOG_FAILURE`: requests are not served unaudited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::BoxError;
use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{Request, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tower::{Layer, Service};
use tracing::info;

use super::ip::{TrustedProxyConfig, extract_client_ip_with_validation};
use super::masking::{MaskStyle, mask_fields};
use crate::cache::{Cache, CacheCategory, CacheKey};
use crate::config::AuditConfig;
use crate::error::{CacheError, SecurityError, SecurityErrorCode};
use crate::metrics;

/// Width of a dedup bucket.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Header carrying the request ID set by the outer request-id layer.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Keys owned by the record; body fields with these names are dropped.
pub const RESERVED_KEYS: [&str; 8] = [
    "timestamp",
    "method",
    "path",
    "status",
    "client_identifier",
    "user_agent",
    "request_id",
    "duration_ms",
];

/// One audited request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub client_identifier: String,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, record: &AuditRecord);
}

/// Writes each record as one `info` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        let payload = serde_json::to_string(record).unwrap_or_default();
        info!(
            target: "audit",
            method = %record.method,
            path = %record.path,
            status = record.status,
            client_ip = %record.client_identifier,
            record = %payload,
            "audit"
        );
    }
}

/// Filter a request body down to the fields an audit record may carry.
///
/// Non-object bodies contribute nothing.
pub fn audit_fields(body: Value, config: &AuditConfig) -> Map<String, Value> {
    let mut body = body;
    mask_fields(&mut body, &config.mask_fields, MaskStyle::PreserveLength);
    let Value::Object(mut map) = body else {
        return Map::new();
    };
    for field in &config.exclude_fields {
        map.remove(field);
    }
    for reserved in RESERVED_KEYS {
        map.remove(reserved);
    }
    map
}

/// Claims one emission per method+path per minute.
#[derive(Debug, Clone)]
pub struct AuditDeduplicator {
    cache: Cache,
}

impl AuditDeduplicator {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    pub fn key(method: &str, path: &str, now_ms: i64) -> CacheKey {
        let bucket = now_ms.div_euclid(DEDUP_WINDOW.as_millis() as i64);
        CacheKey::new(CacheCategory::AuditLog, format!("{method}:{path}")).with_bucket(bucket)
    }

    /// `true` if this request is the first for `method path` in the current
    /// bucket. A disabled cache never deduplicates.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the marker cannot be claimed.
    pub async fn claim(&self, method: &str, path: &str, now_ms: i64) -> Result<bool, CacheError> {
        let key = Self::key(method, path, now_ms);
        let count = self.cache.increment(&key, DEDUP_WINDOW).await?;
        Ok(count.is_none_or(|n| n == 1))
    }
}

#[derive(Clone)]
pub struct AuditLayer {
    dedup: AuditDeduplicator,
    config: Arc<AuditConfig>,
    sink: Arc<dyn AuditSink>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    max_body_size: usize,
}

impl AuditLayer {
    pub fn new(cache: Cache, config: &AuditConfig, max_body_size: usize) -> Self {
        Self {
            dedup: AuditDeduplicator::new(cache),
            config: Arc::new(config.clone()),
            sink: Arc::new(TracingAuditSink),
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
            max_body_size,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxyConfig) -> Self {
        self.trusted_proxies = Arc::new(trusted_proxies);
        self
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            dedup: self.dedup.clone(),
            config: self.config.clone(),
            sink: self.sink.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

#[derive(Clone)]
pub struct AuditService<S> {
    inner: S,
    dedup: AuditDeduplicator,
    config: Arc<AuditConfig>,
    sink: Arc<dyn AuditSink>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for AuditService<S>
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
        let mut inner = self.inner.clone();

        if self.config.skip_paths.iter().any(|p| p == req.uri().path()) {
            return Box::pin(async move { inner.call(req).await.map_err(Into::<BoxError>::into) });
        }

        let dedup = self.dedup.clone();
        let config = self.config.clone();
        let sink = self.sink.clone();
        let max_body_size = self.max_body_size;
        let client = extract_client_ip_with_validation(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            let started = Instant::now();
            let now = Utc::now();
            let method = req.method().as_str().to_string();
            let path = req.uri().path().to_string();

            let should_emit = dedup
                .claim(&method, &path, now.timestamp_millis())
                .await
                .map_err(|e| {
                    SecurityError::new(
                        SecurityErrorCode::AuditLogFailure,
                        "Audit log could not be written",
                    )
                    .with_path(path.as_str())
                    .with_client(client.as_str())
                    .with_internal("cause", e.to_string())
                })?;

            if !should_emit {
                metrics::record_audit("deduplicated");
                return inner.call(req).await.map_err(Into::<BoxError>::into);
            }

            let (parts, body) = req.into_parts();
            let header = |name: &str| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            };
            let pending = PendingRecord {
                started,
                timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                method,
                path,
                client_identifier: client,
                user_agent: header(USER_AGENT.as_str()),
                request_id: header(REQUEST_ID_HEADER),
            };

            let bytes = match axum::body::to_bytes(body, max_body_size).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = SecurityError::new(
                        SecurityErrorCode::InvalidRequest,
                        "Request body could not be read",
                    )
                    .with_path(pending.path.as_str())
                    .with_internal("cause", e.to_string());
                    sink.emit(&pending.finish(err.status().as_u16(), Map::new()));
                    metrics::record_audit("emitted");
                    return Err(BoxError::from(err));
                }
            };
            let fields = serde_json::from_slice::<Value>(&bytes)
                .map(|body| audit_fields(body, &config))
                .unwrap_or_default();

            // The marker is already claimed, so failed requests are recorded too.
            let req = Request::from_parts(parts, Body::from(bytes));
            let result = inner.call(req).await.map_err(Into::<BoxError>::into);
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(err) => error_status(err),
            };
            sink.emit(&pending.finish(status, fields));
            metrics::record_audit("emitted");

            result
        })
    }
}

/// Request metadata captured before the handler runs.
struct PendingRecord {
    started: Instant,
    timestamp: String,
    method: String,
    path: String,
    client_identifier: String,
    user_agent: Option<String>,
    request_id: Option<String>,
}

impl PendingRecord {
    fn finish(self, status: u16, fields: Map<String, Value>) -> AuditRecord {
        AuditRecord {
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            status,
            client_identifier: self.client_identifier,
            user_agent: self.user_agent,
            request_id: self.request_id,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            fields,
        }
    }
}

/// Status the terminal error handler will answer with for `err`.
fn error_status(err: &BoxError) -> u16 {
    err.downcast_ref::<SecurityError>()
        .map_or(500, |e| e.status().as_u16())
}
