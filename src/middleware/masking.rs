//! Sensitive-field masking for outgoing JSON responses.
//!
//! For a JSON object response, every configured top-level field is kept but
//! its value replaced by a placeholder. Nested objects and top-level arrays
//! are not scanned. Non-JSON responses, and bodies that do not parse as
//! JSON, pass through untouched.
//!
//! If the response body cannot be collected the request fails with
//! `SENSITIVE_DATA_EXPOSURE`: an unmasked body is never sent as a fallback.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::BoxError;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::debug;

use crate::config::MaskingConfig;
use crate::error::{SecurityError, SecurityErrorCode};
use crate::metrics;

/// Placeholder used by [`MaskStyle::Fixed`].
pub const FIXED_PLACEHOLDER: &str = "********";

/// How a masked value is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskStyle {
    /// `*` repeated to the length of the original value.
    #[default]
    PreserveLength,
    /// Constant [`FIXED_PLACEHOLDER`], hiding the original length.
    Fixed,
}

impl FromStr for MaskStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve-length" => Ok(MaskStyle::PreserveLength),
            "fixed" => Ok(MaskStyle::Fixed),
            other => Err(format!(
                "unknown mask style '{other}' (expected preserve-length|fixed)"
            )),
        }
    }
}

impl fmt::Display for MaskStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskStyle::PreserveLength => f.write_str("preserve-length"),
            MaskStyle::Fixed => f.write_str("fixed"),
        }
    }
}

/// Placeholder for `value`. Non-string values are measured by their JSON text.
pub fn mask_value(value: &Value, style: MaskStyle) -> Value {
    match style {
        MaskStyle::Fixed => Value::String(FIXED_PLACEHOLDER.to_string()),
        MaskStyle::PreserveLength => {
            let len = match value {
                Value::String(s) => s.chars().count(),
                other => other.to_string().chars().count(),
            };
            Value::String("*".repeat(len))
        }
    }
}

/// Mask the listed top-level fields of an object in place.
///
/// Returns how many fields were masked; non-objects are left alone.
pub fn mask_fields(target: &mut Value, fields: &[String], style: MaskStyle) -> usize {
    let Value::Object(map) = target else {
        return 0;
    };
    let mut masked = 0;
    for field in fields {
        if let Some(value) = map.get_mut(field) {
            *value = mask_value(value, style);
            masked += 1;
        }
    }
    masked
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .is_some_and(|essence| {
            essence.eq_ignore_ascii_case("application/json")
                || essence.to_ascii_lowercase().ends_with("+json")
        })
}

#[derive(Clone)]
pub struct MaskingLayer {
    fields: Arc<[String]>,
    style: MaskStyle,
}

impl MaskingLayer {
    pub fn new(config: &MaskingConfig) -> Self {
        Self {
            fields: Arc::from(config.fields.as_slice()),
            style: config.style,
        }
    }
}

impl<S> Layer<S> for MaskingLayer {
    type Service = MaskingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaskingService {
            inner,
            fields: self.fields.clone(),
            style: self.style,
        }
    }
}

#[derive(Clone)]
pub struct MaskingService<S> {
    inner: S,
    fields: Arc<[String]>,
    style: MaskStyle,
}

impl<S> Service<Request<Body>> for MaskingService<S>
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
        let fields = self.fields.clone();
        let style = self.style;
        let mut inner = self.inner.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
            if !is_json(response.headers()) {
                return Ok(response);
            }

            let (mut parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
                SecurityError::new(
                    SecurityErrorCode::SensitiveDataExposure,
                    "Response could not be inspected for sensitive data",
                )
                .with_path(path.as_str())
                .with_internal("cause", e.to_string())
            })?;

            let Ok(mut json) = serde_json::from_slice::<Value>(&bytes) else {
                debug!(path = %path, "Response declared JSON but did not parse; leaving as is");
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            };

            let masked = mask_fields(&mut json, &fields, style);
            if masked == 0 {
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            }
            metrics::record_masked_fields(masked);

            let rewritten = serde_json::to_vec(&json).map_err(|e| {
                SecurityError::new(
                    SecurityErrorCode::SensitiveDataExposure,
                    "Masked response could not be encoded",
                )
                .with_path(path.as_str())
                .with_internal("cause", e.to_string())
            })?;
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
            Ok::<_, BoxError>(Response::from_parts(parts, Body::from(rewritten)))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::response::IntoResponse;
    use serde_json::json;
    use axum::body::Bytes;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_preserve_length_masks_strings_and_scalars() {
        assert_eq!(mask_value(&json!("secret"), MaskStyle::PreserveLength), json!("******"));
        assert_eq!(mask_value(&json!(12345), MaskStyle::PreserveLength), json!("*****"));
        assert_eq!(mask_value(&json!("ünï"), MaskStyle::PreserveLength), json!("***"));
        assert_eq!(mask_value(&json!("anything"), MaskStyle::Fixed), json!(FIXED_PLACEHOLDER));
    }

    #[test]
    fn test_mask_fields_is_shallow() {
        let mut body = json!({
            "ssn": "123-45-6789",
            "profile": { "ssn": "nested" },
            "name": "Ada"
        });
        let count = mask_fields(&mut body, &fields(&["ssn", "missing"]), MaskStyle::PreserveLength);

        assert_eq!(count, 1);
        assert_eq!(body["ssn"], "***********");
        assert_eq!(body["profile"]["ssn"], "nested");
        assert_eq!(body["name"], "Ada");
    }

    #[test]
    fn test_mask_fields_ignores_arrays() {
        let mut body = json!([{ "ssn": "1" }]);
        assert_eq!(mask_fields(&mut body, &fields(&["ssn"]), MaskStyle::Fixed), 0);
        assert_eq!(body[0]["ssn"], "1");
    }

    #[test]
    fn test_mask_style_parsing() {
        assert_eq!("fixed".parse::<MaskStyle>().unwrap(), MaskStyle::Fixed);
        assert_eq!(
            "Preserve-Length".parse::<MaskStyle>().unwrap(),
            MaskStyle::PreserveLength
        );
        assert!("blur".parse::<MaskStyle>().is_err());
        assert_eq!(serde_json::to_value(MaskStyle::PreserveLength).unwrap(), "preserve-length");
    }

    #[test]
    fn test_is_json_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(is_json(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/problem+json"));
        assert!(is_json(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json(&headers));
    }

    fn layer(names: &[&str], style: MaskStyle) -> MaskingLayer {
        MaskingLayer::new(&MaskingConfig {
            enabled: true,
            fields: fields(names),
            style,
        })
    }

    #[tokio::test]
    async fn test_layer_rewrites_json_and_content_length() {
        let svc = layer(&["apiKey"], MaskStyle::Fixed).layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Json(json!({ "apiKey": "sk_live_1234", "id": 7 })).into_response())
        }));

        let response = svc
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();
        let length: usize = response.headers()[CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(length, bytes.len());

        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "apiKey": FIXED_PLACEHOLDER, "id": 7 }));
    }

    #[tokio::test]
    async fn test_unreadable_json_body_fails_closed() {
        let svc = layer(&["ssn"], MaskStyle::PreserveLength).layer(service_fn(
            |_req: Request<Body>| async {
                let chunks = futures_util::stream::iter(vec![
                    Ok(Bytes::from_static(br#"{"ssn":"123-45-"#)),
                    Err(std::io::Error::other("connection reset")),
                ]);
                let mut response = Response::new(Body::from_stream(chunks));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok::<_, Infallible>(response)
            },
        ));

        let err = svc
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap_err()
            .downcast::<SecurityError>()
            .unwrap();
        assert_eq!(err.code(), SecurityErrorCode::SensitiveDataExposure);
        assert_eq!(err.path(), Some("/me"));
        assert!(!err.to_response().error.message.contains("123-45"));
    }

    #[tokio::test]
    async fn test_layer_leaves_text_untouched() {
        let svc = layer(&["ssn"], MaskStyle::Fixed).layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(r#"{"ssn":"123"}"#.into_response())
        }));

        let response = svc
            .oneshot(Request::builder().body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"ssn":"123"}"#);
    }
}
