//! Terminal error channel of the security pipeline.
//!
//! Every stage fails with a boxed error. [`handle_error`] turns a
//! [`SecurityError`] into its status and wire body; anything else is wrapped
//! as a sanitized 500 `INVALID_REQUEST` whose original text is only logged.
//! Handler panics caught by `CatchPanicLayer` go through [`handle_panic`]
//! and produce the same sanitized body.

use std::any::Any;
use std::convert::Infallible;

use axum::BoxError;
use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;

use crate::error::SecurityError;

/// Map any pipeline error to a client-safe response.
pub async fn handle_error(err: BoxError) -> Response<Body> {
    error_response(err)
}

/// Synchronous core of [`handle_error`].
pub fn error_response(err: BoxError) -> Response<Body> {
    match err.downcast::<SecurityError>() {
        Ok(security) => security.into_response(),
        Err(other) => SecurityError::unexpected(&other).into_response(),
    }
}

/// Response for a panic caught while serving a request.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    SecurityError::unexpected(&format!("handler panicked: {detail}")).into_response()
}

/// Lift an infallible service error into the pipeline's error type.
pub fn into_box_error(never: Infallible) -> BoxError {
    match never {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::{SecurityErrorCode, SecurityErrorResponse};
    use axum::http::StatusCode;
    use serde_json::json;

    async fn body(response: Response<Body>) -> SecurityErrorResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_security_error_uses_its_status() {
        let err = SecurityError::new(SecurityErrorCode::PasswordPolicyViolation, "weak")
            .with_details(json!({ "failedRules": ["minLength"] }));
        let response = handle_error(Box::new(err)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body(response).await;
        assert_eq!(body.error.code, SecurityErrorCode::PasswordPolicyViolation);
        assert_eq!(body.error.details, Some(json!({ "failedRules": ["minLength"] })));
    }

    #[tokio::test]
    async fn test_foreign_error_is_sanitized() {
        let err: BoxError = "connection string postgres://admin:pw@db".into();
        let response = handle_error(err).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(response).await;
        assert_eq!(body.error.code, SecurityErrorCode::InvalidRequest);
        assert!(!body.error.message.contains("postgres"));
        assert!(body.error.details.is_none());
    }

    #[tokio::test]
    async fn test_panic_is_sanitized() {
        let response = handle_panic(Box::new("index out of bounds at secret.rs"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(response).await;
        assert!(!body.error.message.contains("secret.rs"));
    }
}
