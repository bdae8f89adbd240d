//! Security error taxonomy and its wire representation.
//!
//! Every failure raised by the security pipeline is a [`SecurityError`]
//! carrying one of ten closed [`SecurityErrorCode`]s. Errors are created at
//! the point of failure and never mutated once they leave the builder
//! methods. Before reaching a client they are converted into a
//! [`SecurityErrorResponse`], which exposes only the code, the message and
//! the explicitly public `details`. Server-side context (store failures,
//! original messages of unexpected errors) stays in `internal` and is only
//! logged.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::metrics;

/// Closed set of security error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityErrorCode {
    RateLimitExceeded,
    PasswordPolicyViolation,
    InvalidAuthentication,
    InvalidAuthorization,
    SensitiveDataExposure,
    AuditLogFailure,
    CacheError,
    SecurityHeaderError,
    CorsViolation,
    InvalidRequest,
}

impl SecurityErrorCode {
    /// All codes, in declaration order.
    pub const ALL: [SecurityErrorCode; 10] = [
        Self::RateLimitExceeded,
        Self::PasswordPolicyViolation,
        Self::InvalidAuthentication,
        Self::InvalidAuthorization,
        Self::SensitiveDataExposure,
        Self::AuditLogFailure,
        Self::CacheError,
        Self::SecurityHeaderError,
        Self::CorsViolation,
        Self::InvalidRequest,
    ];

    /// HTTP status associated with this code.
    pub const fn status(self) -> StatusCode {
        match self {
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::PasswordPolicyViolation => StatusCode::BAD_REQUEST,
            Self::InvalidAuthentication => StatusCode::UNAUTHORIZED,
            Self::InvalidAuthorization => StatusCode::FORBIDDEN,
            Self::SensitiveDataExposure => StatusCode::BAD_REQUEST,
            Self::AuditLogFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CacheError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SecurityHeaderError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CorsViolation => StatusCode::FORBIDDEN,
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
        }
    }

    /// Wire name of the code (e.g. `RATE_LIMIT_EXCEEDED`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::PasswordPolicyViolation => "PASSWORD_POLICY_VIOLATION",
            Self::InvalidAuthentication => "INVALID_AUTHENTICATION",
            Self::InvalidAuthorization => "INVALID_AUTHORIZATION",
            Self::SensitiveDataExposure => "SENSITIVE_DATA_EXPOSURE",
            Self::AuditLogFailure => "AUDIT_LOG_FAILURE",
            Self::CacheError => "CACHE_ERROR",
            Self::SecurityHeaderError => "SECURITY_HEADER_ERROR",
            Self::CorsViolation => "CORS_VIOLATION",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for SecurityErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security failure raised somewhere in the pipeline.
///
/// The timestamp is captured at construction so that serializing the same
/// error twice (e.g. on a retried write) reports the same instant.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct SecurityError {
    code: SecurityErrorCode,
    status: StatusCode,
    message: String,
    timestamp: DateTime<Utc>,
    path: Option<String>,
    client_identifier: Option<String>,
    /// Client-visible details, copied verbatim into the response.
    details: Option<Value>,
    /// Server-side context, never serialized to clients.
    internal: Map<String, Value>,
}

impl SecurityError {
    /// Create an error with the status mapped from `code`.
    pub fn new(code: SecurityErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code.status(),
            message: message.into(),
            timestamp: Utc::now(),
            path: None,
            client_identifier: None,
            details: None,
            internal: Map::new(),
        }
    }

    /// Wrap an error that is not part of the taxonomy.
    ///
    /// The client sees `INVALID_REQUEST` with a generic message and a 500
    /// status; the original text is retained in the internal metadata only.
    pub fn unexpected(source: &(dyn fmt::Display + '_)) -> Self {
        let mut err = Self::new(
            SecurityErrorCode::InvalidRequest,
            "An unexpected error occurred while processing the request",
        )
        .with_internal("original_error", source.to_string());
        err.status = StatusCode::INTERNAL_SERVER_ERROR;
        err
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_client(mut self, client_identifier: impl Into<String>) -> Self {
        self.client_identifier = Some(client_identifier.into());
        self
    }

    /// Attach client-visible details (the only metadata that leaves the server).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach server-side context.
    pub fn with_internal(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.internal.insert(key.to_string(), value.into());
        self
    }

    pub fn code(&self) -> SecurityErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn client_identifier(&self) -> Option<&str> {
        self.client_identifier.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn internal(&self) -> &Map<String, Value> {
        &self.internal
    }

    /// Convert into the client-safe wire shape.
    pub fn to_response(&self) -> SecurityErrorResponse {
        SecurityErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message.clone(),
                details: self.details.clone(),
            },
            timestamp: self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Wire body of a [`SecurityError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityErrorResponse {
    pub error: ErrorBody,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: SecurityErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        // Full context is logged server-side; the body only carries the wire shape.
        if self.status.is_server_error() {
            let internal = Value::Object(self.internal.clone());
            tracing::error!(
                code = %self.code,
                path = self.path.as_deref().unwrap_or("-"),
                client = self.client_identifier.as_deref().unwrap_or("-"),
                internal = %internal,
                "Security pipeline failure: {}",
                self.message
            );
        } else {
            tracing::warn!(
                code = %self.code,
                path = self.path.as_deref().unwrap_or("-"),
                client = self.client_identifier.as_deref().unwrap_or("-"),
                "Request rejected: {}",
                self.message
            );
        }
        metrics::record_security_error(self.code.as_str());

        (self.status, axum::Json(self.to_response())).into_response()
    }
}

/// Errors raised by the cache abstraction and its backing stores.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to connect to cache store: {0}")]
    Connection(String),

    #[error("Cache {operation} failed: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn store(operation: &'static str, err: impl fmt::Display) -> Self {
        CacheError::Store {
            operation,
            message: err.to_string(),
        }
    }
}

impl From<CacheError> for SecurityError {
    fn from(err: CacheError) -> Self {
        SecurityError::new(
            SecurityErrorCode::CacheError,
            "Security cache is unavailable",
        )
        .with_internal("cause", err.to_string())
    }
}

/// Invalid or inconsistent configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Convenience alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Convenience alias for pipeline stages.
pub type SecurityResult<T> = Result<T, SecurityError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_table() {
        let expected = [429, 400, 401, 403, 400, 500, 500, 500, 403, 400];
        for (code, status) in SecurityErrorCode::ALL.iter().zip(expected) {
            assert_eq!(code.status().as_u16(), status, "status for {code}");
        }
    }

    #[test]
    fn test_code_serializes_to_wire_name() {
        for code in SecurityErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, Value::String(code.as_str().to_string()));
        }
    }

    #[test]
    fn test_response_strips_internal_metadata() {
        let err = SecurityError::new(SecurityErrorCode::CacheError, "store down")
            .with_internal("cause", "connection refused to 10.0.0.5:6379")
            .with_path("/api")
            .with_client("1.2.3.4");

        let body = serde_json::to_string(&err.to_response()).unwrap();
        assert!(!body.contains("10.0.0.5"));
        assert!(!body.contains("1.2.3.4"));
        assert!(!body.contains("details"));
        assert!(body.contains("CACHE_ERROR"));
    }

    #[test]
    fn test_response_keeps_public_details() {
        let err = SecurityError::new(SecurityErrorCode::PasswordPolicyViolation, "weak")
            .with_details(json!({"minLength": 8}));
        let response = err.to_response();
        assert_eq!(response.error.details, Some(json!({"minLength": 8})));
    }

    #[test]
    fn test_timestamp_fixed_at_construction() {
        let err = SecurityError::new(SecurityErrorCode::InvalidRequest, "bad");
        let first = err.to_response().timestamp;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = err.to_response().timestamp;
        assert_eq!(first, second);
        assert!(DateTime::parse_from_rfc3339(&first).is_ok());
    }

    #[test]
    fn test_unexpected_hides_original_message() {
        let err = SecurityError::unexpected(&"database password is hunter2");
        assert_eq!(err.code(), SecurityErrorCode::InvalidRequest);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("hunter2"));
        assert_eq!(
            err.internal().get("original_error"),
            Some(&json!("database password is hunter2"))
        );
    }

    #[test]
    fn test_cache_error_converts_to_cache_code() {
        let err: SecurityError = CacheError::store("get", "timeout").into();
        assert_eq!(err.code(), SecurityErrorCode::CacheError);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.internal().get("cause"), Some(&json!("Cache get failed: timeout")));
    }

    #[tokio::test]
    async fn test_server_error_response_logs_internal_but_omits_it() {
        let response = SecurityError::new(SecurityErrorCode::AuditLogFailure, "audit down")
            .with_internal("cause", "disk full on /var/log")
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: SecurityErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.code, SecurityErrorCode::AuditLogFailure);
        assert!(!String::from_utf8_lossy(&bytes).contains("disk full"));
    }
}
