//! Password policy enforcement on the registration route.
//!
//! Only requests matching the configured method and path are inspected.
//! Their JSON body is buffered, the `password` field is checked against the
//! [`PasswordPolicy`], and the request is rebuilt from the buffered bytes
//! before it reaches the handler.
//!
//! Decisions are memoized for an hour under an HMAC-SHA256 of the policy
//! fingerprint and the password, so the cache never holds the secret and a
//! policy change never replays an old decision. The HMAC key comes from
//! `memo_key` when configured, otherwise from a per-process random draw, so
//! a leaked cache entry cannot be checked against a password dictionary
//! without the key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::BoxError;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use serde_json::{Value, json};
use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::cache::{Cache, CacheCategory, CacheKey};
use crate::config::PasswordPolicyConfig;
use crate::error::{CacheError, SecurityError, SecurityErrorCode};
use crate::metrics;
use crate::policy::PasswordPolicy;

/// How long a policy decision is memoized.
pub const DECISION_TTL: Duration = Duration::from_secs(3600);

type HmacSha256 = Hmac<Sha256>;

/// HMAC keyed by `secret`, or by fresh random bytes when `None`.
fn memo_mac(secret: Option<&str>) -> HmacSha256 {
    let mut key = Key::<HmacSha256>::default();
    match secret {
        Some(secret) => key[..32].copy_from_slice(&Sha256::digest(secret.as_bytes())),
        None => rand::rng().fill_bytes(&mut key[..]),
    }
    <HmacSha256 as KeyInit>::new(&key)
}

/// Policy predicate with cache-backed memoization.
#[derive(Clone)]
pub struct MemoizedPolicy {
    cache: Cache,
    policy: Arc<PasswordPolicy>,
    mac: HmacSha256,
}

impl std::fmt::Debug for MemoizedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizedPolicy")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MemoizedPolicy {
    pub fn new(cache: Cache, policy: PasswordPolicy, memo_key: Option<&str>) -> Self {
        Self {
            cache,
            policy: Arc::new(policy),
            mac: memo_mac(memo_key),
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Cache key for the decision on `password` under this policy.
    pub fn decision_key(&self, password: &str) -> CacheKey {
        let mut mac = self.mac.clone();
        mac.update(self.policy.fingerprint().as_bytes());
        mac.update(&[0u8]);
        mac.update(password.as_bytes());
        CacheKey::new(
            CacheCategory::PasswordPolicy,
            hex::encode(mac.finalize().into_bytes()),
        )
    }

    /// Whether `password` satisfies the policy, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the memo cannot be read or written.
    pub async fn check(&self, password: &str) -> Result<bool, CacheError> {
        let key = self.decision_key(password);
        if let Some(decision) = self.cache.get::<bool>(&key).await? {
            debug!("Password policy decision served from cache");
            return Ok(decision);
        }

        let decision = self.policy.is_satisfied_by(password);
        self.cache.set(&key, &decision, Some(DECISION_TTL)).await?;
        Ok(decision)
    }
}

#[derive(Clone)]
pub struct PasswordPolicyLayer {
    checker: MemoizedPolicy,
    method: Method,
    path: Arc<str>,
    max_body_size: usize,
}

impl PasswordPolicyLayer {
    /// `max_body_size` bounds how much of a matching request is buffered.
    pub fn new(cache: Cache, config: &PasswordPolicyConfig, max_body_size: usize) -> Self {
        Self {
            checker: MemoizedPolicy::new(
                cache,
                config.policy.clone(),
                config.memo_key.as_deref(),
            ),
            method: Method::from_bytes(config.method.as_bytes()).unwrap_or(Method::POST),
            path: Arc::from(config.path.as_str()),
            max_body_size,
        }
    }
}

impl<S> Layer<S> for PasswordPolicyLayer {
    type Service = PasswordPolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PasswordPolicyService {
            inner,
            checker: self.checker.clone(),
            method: self.method.clone(),
            path: self.path.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

#[derive(Clone)]
pub struct PasswordPolicyService<S> {
    inner: S,
    checker: MemoizedPolicy,
    method: Method,
    path: Arc<str>,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for PasswordPolicyService<S>
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

        if *req.method() != self.method || req.uri().path() != &*self.path {
            return Box::pin(async move { inner.call(req).await.map_err(Into::<BoxError>::into) });
        }

        let checker = self.checker.clone();
        let max_body_size = self.max_body_size;

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let path = parts.uri.path().to_string();

            let bytes = axum::body::to_bytes(body, max_body_size)
                .await
                .map_err(|e| {
                    SecurityError::new(
                        SecurityErrorCode::InvalidRequest,
                        "Request body could not be read",
                    )
                    .with_path(path.as_str())
                    .with_internal("cause", e.to_string())
                })?;

            let password = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| body.get("password").and_then(Value::as_str).map(str::to_owned))
                .ok_or_else(|| {
                    SecurityError::new(
                        SecurityErrorCode::InvalidRequest,
                        "Request body must be JSON with a string 'password' field",
                    )
                    .with_path(path.as_str())
                })?;

            let compliant = checker
                .check(&password)
                .await
                .map_err(|e| SecurityError::from(e).with_path(path.as_str()))?;

            if !compliant {
                let failed = checker.policy().violations(&password);
                warn!(path = %path, failed_rules = ?failed, "Password policy violation");
                metrics::record_password_violation();
                let err = SecurityError::new(
                    SecurityErrorCode::PasswordPolicyViolation,
                    "Password does not meet the security policy",
                )
                .with_path(path)
                .with_details(json!({
                    "policy": checker.policy(),
                    "failedRules": failed,
                }));
                return Err(BoxError::from(err));
            }

            let req = Request::from_parts(parts, Body::from(bytes));
            inner.call(req).await.map_err(Into::<BoxError>::into)
        })
    }
}
