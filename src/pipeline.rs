//! Middleware composer.
//!
//! [`SecurityPipeline`] turns one [`SecurityConfig`] into the ordered stack
//!
//! ```text
//! error handler → rate limit → password policy → headers → audit → masking → handler
//! ```
//!
//! A stage whose configuration block is absent or disabled is left out.
//! The terminal error handler is always present and converts every error a
//! stage forwards into a response.

use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use tower::ServiceBuilder;
use tracing::info;

use crate::cache::Cache;
use crate::config::SecurityConfig;
use crate::middleware::audit::{AuditLayer, AuditSink, TracingAuditSink};
use crate::middleware::error_handler::{handle_error, into_box_error};
use crate::middleware::ip::TrustedProxyConfig;
use crate::middleware::masking::MaskingLayer;
use crate::middleware::password_policy::PasswordPolicyLayer;
use crate::middleware::rate_limit::{MaxRequests, RateLimitLayer};
use crate::middleware::security_headers::SecurityHeadersLayer;

/// Default bound on buffered request bodies.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateLimit,
    PasswordPolicy,
    SecurityHeaders,
    Audit,
    DataMasking,
    ErrorHandler,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RateLimit => "rate-limit",
            Stage::PasswordPolicy => "password-policy",
            Stage::SecurityHeaders => "security-headers",
            Stage::Audit => "audit",
            Stage::DataMasking => "data-masking",
            Stage::ErrorHandler => "error-handler",
        };
        f.write_str(name)
    }
}

/// Builds the security layer stack from configuration.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = SecurityPipeline::new(config.security.clone(), cache);
/// let app = pipeline.apply(Router::new().route("/api", get(handler)));
/// ```
#[derive(Clone)]
pub struct SecurityPipeline {
    config: Arc<SecurityConfig>,
    cache: Cache,
    audit_sink: Arc<dyn AuditSink>,
    rate_limit_max: Option<MaxRequests>,
    max_body_size: usize,
}

impl SecurityPipeline {
    pub fn new(config: SecurityConfig, cache: Cache) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            audit_sink: Arc::new(TracingAuditSink),
            rate_limit_max: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Send audit records somewhere other than the tracing subscriber.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Override the configured rate-limit maximum, e.g. with a per-request function.
    pub fn with_rate_limit_max(mut self, max: impl Into<MaxRequests>) -> Self {
        self.rate_limit_max = Some(max.into());
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Stages the pipeline will run, in order.
    pub fn stages(&self) -> Vec<Stage> {
        let config = &self.config;
        [
            (config.rate_limit_enabled(), Stage::RateLimit),
            (config.password_policy_enabled(), Stage::PasswordPolicy),
            (config.headers_enabled(), Stage::SecurityHeaders),
            (config.audit_enabled(), Stage::Audit),
            (config.masking_enabled(), Stage::DataMasking),
            (true, Stage::ErrorHandler),
        ]
        .into_iter()
        .filter_map(|(enabled, stage)| enabled.then_some(stage))
        .collect()
    }

    fn rate_limit_layer(&self) -> Option<RateLimitLayer> {
        let config = self.config.rate_limit.as_ref().filter(|c| c.enabled)?;
        let layer = RateLimitLayer::new(self.cache.clone(), config);
        Some(match &self.rate_limit_max {
            Some(max) => layer.with_max(max.clone()),
            None => layer,
        })
    }

    fn password_layer(&self) -> Option<PasswordPolicyLayer> {
        let config = self.config.password_policy.as_ref().filter(|c| c.enabled)?;
        Some(PasswordPolicyLayer::new(
            self.cache.clone(),
            config,
            self.max_body_size,
        ))
    }

    fn headers_layer(&self) -> Option<SecurityHeadersLayer> {
        self.config
            .headers_enabled()
            .then(|| SecurityHeadersLayer::new(self.cache.clone(), &self.config))
    }

    fn audit_layer(&self) -> Option<AuditLayer> {
        let config = self.config.audit.as_ref().filter(|c| c.enabled)?;
        let trusted = self
            .config
            .rate_limit
            .as_ref()
            .map(|c| TrustedProxyConfig::new(&c.trusted_proxies))
            .unwrap_or_default();
        Some(
            AuditLayer::new(self.cache.clone(), config, self.max_body_size)
                .with_sink(self.audit_sink.clone())
                .with_trusted_proxies(trusted),
        )
    }

    fn masking_layer(&self) -> Option<MaskingLayer> {
        let data_protection = self.config.data_protection.as_ref()?;
        self.config
            .masking_enabled()
            .then(|| MaskingLayer::new(&data_protection.masking))
    }

    /// Wrap every route of `router` in the security stack.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let stages: Vec<String> = self.stages().iter().map(ToString::to_string).collect();
        info!(
            stages = %stages.join(" → "),
            cache = self.cache.store_name(),
            "Security pipeline assembled"
        );

        let stack = ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .option_layer(self.rate_limit_layer())
            .option_layer(self.password_layer())
            .option_layer(self.headers_layer())
            .option_layer(self.audit_layer())
            .option_layer(self.masking_layer())
            .map_err(into_box_error);

        router.layer(stack)
    }
}
