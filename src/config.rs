//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables (optionally via a
//! `.env` file) with development-friendly defaults. Every block also derives
//! `Deserialize`, so a bootstrap that prefers files can build the same
//! structures directly. The security layer only ever reads this
//! configuration; it is constructed once at startup and shared by reference.
//!
//! # Security Blocks
//!
//! Each middleware is driven by an optional block of [`SecurityConfig`]. A
//! missing or disabled block removes that middleware from the pipeline:
//!
//! - `RATE_LIMIT_ENABLED` / `RATE_LIMIT_MAX` / `RATE_LIMIT_WINDOW_MS`
//! - `PASSWORD_POLICY_ENABLED` / `PASSWORD_MIN_LENGTH` / `PASSWORD_REQUIRE_*`
//! - `PASSWORD_MEMO_KEY` (shared secret for memoized decisions)
//! - `SECURITY_HEADERS_BASELINE` / `SECURITY_HEADERS`
//! - `AUDIT_ENABLED` / `AUDIT_EXCLUDE_FIELDS` / `AUDIT_MASK_FIELDS`
//! - `DATA_MASKING_ENABLED` / `DATA_MASKING_FIELDS` / `DATA_MASKING_STYLE`
//!
//! # Cache
//!
//! - `CACHE_ENABLED`, `CACHE_TTL_SECS`, `CACHE_PREFIX`
//! - `CACHE_STORE=memory|redis` with `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::middleware::masking::MaskStyle;
use crate::middleware::rate_limit::RejectionMode;
use crate::policy::PasswordPolicy;

/// Minimum rate-limit window accepted by validation.
pub const MIN_WINDOW_MS: u64 = 1_000;

/// Response fields masked when `DATA_MASKING_FIELDS` is unset.
pub const DEFAULT_MASK_FIELDS: [&str; 5] = ["password", "ssn", "creditCard", "apiKey", "token"];

/// Application configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1 MiB).
    /// Also bounds how much body the password and audit stages buffer.
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (0 = disabled)
    pub metrics_port: u16,

    /// Interval for purging expired in-memory cache records (0 = never)
    pub cache_purge_interval: Duration,

    // =========================================================================
    // Security Layer
    // =========================================================================
    pub cache: CacheConfig,

    pub security: SecurityConfig,
}

/// Which backing store the cache uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Redis,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            other => Err(format!("unknown cache store '{other}' (expected memory|redis)")),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Default entry TTL in seconds (0 = no expiry)
    pub ttl_secs: u64,
    pub prefix: String,
    pub store: StoreKind,
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            prefix: "security".to_string(),
            store: StoreKind::Memory,
            redis: None,
        }
    }
}

/// Redis connection parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .finish()
    }
}


/// Security middleware configuration. Absent blocks disable their stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub cors: Option<CorsConfig>,
    /// Apply the baseline hardening header set
    pub helmet: bool,
    pub rate_limit: Option<RateLimitConfig>,
    /// Custom response headers; override baseline entries of the same name
    pub headers: BTreeMap<String, String>,
    pub audit: Option<AuditConfig>,
    pub password_policy: Option<PasswordPolicyConfig>,
    pub data_protection: Option<DataProtectionConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors: Some(CorsConfig::default()),
            helmet: true,
            rate_limit: Some(RateLimitConfig::default()),
            headers: BTreeMap::new(),
            audit: Some(AuditConfig::default()),
            password_policy: Some(PasswordPolicyConfig::default()),
            data_protection: Some(DataProtectionConfig::default()),
        }
    }
}

impl SecurityConfig {
    /// Configuration with every stage absent.
    pub fn empty() -> Self {
        Self {
            cors: None,
            helmet: false,
            rate_limit: None,
            headers: BTreeMap::new(),
            audit: None,
            password_policy: None,
            data_protection: None,
        }
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit.as_ref().is_some_and(|c| c.enabled)
    }

    pub fn password_policy_enabled(&self) -> bool {
        self.password_policy.as_ref().is_some_and(|c| c.enabled)
    }

    /// Header stage runs when the baseline set or any custom header is configured.
    pub fn headers_enabled(&self) -> bool {
        self.helmet || !self.headers.is_empty()
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit.as_ref().is_some_and(|c| c.enabled)
    }

    pub fn masking_enabled(&self) -> bool {
        self.data_protection
            .as_ref()
            .is_some_and(|c| c.enabled && c.masking.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client per window
    pub max: u64,
    pub window_ms: u64,
    pub mode: RejectionMode,
    /// CIDR ranges whose `X-Forwarded-For` is trusted (empty = trust all)
    pub trusted_proxies: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max: 100,
            window_ms: 60_000,
            mode: RejectionMode::Respond,
            trusted_proxies: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicyConfig {
    pub enabled: bool,
    pub policy: PasswordPolicy,
    /// Route the policy is enforced on
    pub path: String,
    pub method: String,
    /// Secret keying the memoized decisions. Instances sharing a Redis
    /// cache need the same value to share decisions; when unset each
    /// process draws a random key.
    #[serde(skip_serializing)]
    pub memo_key: Option<String>,
}

impl std::fmt::Debug for PasswordPolicyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordPolicyConfig")
            .field("enabled", &self.enabled)
            .field("policy", &self.policy)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("memo_key", &self.memo_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: PasswordPolicy::default(),
            path: "/api/auth/register".to_string(),
            method: "POST".to_string(),
            memo_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Body fields removed from audit records
    pub exclude_fields: Vec<String>,
    /// Body fields kept but masked in audit records
    pub mask_fields: Vec<String>,
    /// Paths that are never audited
    pub skip_paths: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_fields: vec!["password".to_string(), "confirmPassword".to_string()],
            mask_fields: Vec::new(),
            skip_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataProtectionConfig {
    pub enabled: bool,
    pub masking: MaskingConfig,
}

impl Default for DataProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            masking: MaskingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    pub enabled: bool,
    /// Top-level response fields to mask
    pub fields: Vec<String>,
    pub style: MaskStyle,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: DEFAULT_MASK_FIELDS.iter().map(|f| f.to_string()).collect(),
            style: MaskStyle::PreserveLength,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any value fails to parse or the resulting
    /// configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 3000)?,
            max_request_body_size: parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            metrics_port: parse_env("METRICS_PORT", 0)?,
            cache_purge_interval: Duration::from_secs(parse_env("CACHE_PURGE_INTERVAL_SECS", 300)?),
            cache: cache_from_env()?,
            security: security_from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_body_size == 0 {
            return Err(ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.store == StoreKind::Redis && self.cache.redis.is_none() {
            return Err(ConfigError(
                "CACHE_STORE=redis requires REDIS_HOST to be set".to_string(),
            ));
        }

        if let Some(rate_limit) = self.security.rate_limit.as_ref().filter(|c| c.enabled) {
            if rate_limit.max == 0 {
                return Err(ConfigError(
                    "RATE_LIMIT_MAX must be greater than 0; set RATE_LIMIT_ENABLED=false instead"
                        .to_string(),
                ));
            }
            if rate_limit.window_ms < MIN_WINDOW_MS {
                return Err(ConfigError(format!(
                    "RATE_LIMIT_WINDOW_MS must be at least {MIN_WINDOW_MS}"
                )));
            }
        }

        if let Some(password) = self.security.password_policy.as_ref().filter(|c| c.enabled) {
            if !password.path.starts_with('/') {
                return Err(ConfigError(format!(
                    "PASSWORD_POLICY_PATH must start with '/': {}",
                    password.path
                )));
            }
            Method::from_bytes(password.method.as_bytes()).map_err(|_| {
                ConfigError(format!("Invalid PASSWORD_POLICY_METHOD: {}", password.method))
            })?;
        }

        for (name, value) in &self.security.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError(format!("Invalid security header name: {name}")))?;
            HeaderValue::from_str(value)
                .map_err(|_| ConfigError(format!("Invalid value for security header {name}")))?;
        }

        if self.security.masking_enabled()
            && self
                .security
                .data_protection
                .as_ref()
                .is_some_and(|c| c.masking.fields.is_empty())
        {
            return Err(ConfigError(
                "DATA_MASKING_FIELDS must list at least one field when masking is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tracing filter built from `log_level`, falling back to `info` when
    /// the directive does not parse.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Get the metrics endpoint address, or `None` when disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        (self.metrics_port > 0).then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }
}

/// Default configuration for testing and development.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 1024 * 1024,
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 0,
            cache_purge_interval: Duration::from_secs(300),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

fn cache_from_env() -> Result<CacheConfig, ConfigError> {
    let redis = match env::var("REDIS_HOST").ok().filter(|h| !h.is_empty()) {
        Some(host) => Some(RedisConfig {
            host,
            port: parse_env("REDIS_PORT", 6379)?,
            password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            db: parse_env("REDIS_DB", 0)?,
        }),
        None => None,
    };

    Ok(CacheConfig {
        enabled: parse_env("CACHE_ENABLED", true)?,
        ttl_secs: parse_env("CACHE_TTL_SECS", 3600)?,
        prefix: env::var("CACHE_PREFIX").unwrap_or_else(|_| "security".to_string()),
        store: parse_env("CACHE_STORE", StoreKind::Memory)?,
        redis,
    })
}

fn security_from_env() -> Result<SecurityConfig, ConfigError> {
    let cors = env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|raw| CorsConfig {
            allowed_origins: parse_csv(&raw),
        })
        .or_else(|| Some(CorsConfig::default()));

    let rate_limit = RateLimitConfig {
        enabled: parse_env("RATE_LIMIT_ENABLED", true)?,
        max: parse_env("RATE_LIMIT_MAX", 100)?,
        window_ms: parse_env("RATE_LIMIT_WINDOW_MS", 60_000)?,
        mode: parse_env("RATE_LIMIT_MODE", RejectionMode::Respond)?,
        trusted_proxies: env::var("TRUSTED_PROXIES")
            .map(|raw| parse_csv(&raw))
            .unwrap_or_default(),
    };

    let defaults = PasswordPolicy::default();
    let password_policy = PasswordPolicyConfig {
        enabled: parse_env("PASSWORD_POLICY_ENABLED", true)?,
        policy: PasswordPolicy {
            min_length: parse_env("PASSWORD_MIN_LENGTH", defaults.min_length)?,
            require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", defaults.require_uppercase)?,
            require_lowercase: parse_env("PASSWORD_REQUIRE_LOWERCASE", defaults.require_lowercase)?,
            require_numbers: parse_env("PASSWORD_REQUIRE_NUMBERS", defaults.require_numbers)?,
            require_special_chars: parse_env(
                "PASSWORD_REQUIRE_SPECIAL",
                defaults.require_special_chars,
            )?,
        },
        path: env::var("PASSWORD_POLICY_PATH").unwrap_or_else(|_| "/api/auth/register".to_string()),
        method: env::var("PASSWORD_POLICY_METHOD")
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_else(|_| "POST".to_string()),
        memo_key: env::var("PASSWORD_MEMO_KEY").ok().filter(|k| !k.is_empty()),
    };

    let audit = AuditConfig {
        enabled: parse_env("AUDIT_ENABLED", true)?,
        exclude_fields: csv_env("AUDIT_EXCLUDE_FIELDS", "password,confirmPassword"),
        mask_fields: csv_env("AUDIT_MASK_FIELDS", ""),
        skip_paths: csv_env("AUDIT_SKIP_PATHS", ""),
    };

    let masking_enabled: bool = parse_env("DATA_MASKING_ENABLED", true)?;
    let data_protection = DataProtectionConfig {
        enabled: masking_enabled,
        masking: MaskingConfig {
            enabled: masking_enabled,
            fields: csv_env("DATA_MASKING_FIELDS", &DEFAULT_MASK_FIELDS.join(",")),
            style: parse_env("DATA_MASKING_STYLE", MaskStyle::PreserveLength)?,
        },
    };

    Ok(SecurityConfig {
        cors,
        helmet: parse_env("SECURITY_HEADERS_BASELINE", true)?,
        rate_limit: Some(rate_limit),
        headers: parse_header_spec(&env::var("SECURITY_HEADERS").unwrap_or_default())?,
        audit: Some(audit),
        password_policy: Some(password_policy),
        data_protection: Some(data_protection),
    })
}

/// Parse an environment variable into the specified type with a default value.
fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|e| ConfigError(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn csv_env(name: &str, default: &str) -> Vec<String> {
    parse_csv(&env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `Name: value;Other-Name: value` into a header map.
pub fn parse_header_spec(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut headers = BTreeMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError(format!("Invalid SECURITY_HEADERS entry: {entry}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError(format!("Invalid SECURITY_HEADERS entry: {entry}")));
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_follows_log_level() {
        let config = Config {
            log_level: "compliance_guard=debug".to_string(),
            ..Config::default()
        };
        assert_eq!(config.log_filter().to_string(), "compliance_guard=debug");
    }

    #[test]
    fn test_invalid_log_level_falls_back_to_info() {
        let config = Config {
            log_level: "compliance_guard=loud".to_string(),
            ..Config::default()
        };
        assert_eq!(config.log_filter().to_string(), "info");
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.store, StoreKind::Memory);
        assert!(config.security.rate_limit_enabled());
        assert!(config.security.headers_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_metrics_addr_disabled_by_default() {
        assert!(Config::default().metrics_addr().is_none());
        let config = Config {
            metrics_port: 9090,
            ..Config::default()
        };
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
    }

    #[test]
    fn test_validate_zero_max() {
        let mut config = Config::default();
        config.security.rate_limit = Some(RateLimitConfig {
            max: 0,
            ..RateLimitConfig::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_MAX"));
    }

    #[test]
    fn test_validate_zero_max_ignored_when_disabled() {
        let mut config = Config::default();
        config.security.rate_limit = Some(RateLimitConfig {
            enabled: false,
            max: 0,
            ..RateLimitConfig::default()
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_short_window() {
        let mut config = Config::default();
        config.security.rate_limit = Some(RateLimitConfig {
            window_ms: 10,
            ..RateLimitConfig::default()
        });
        assert!(config.validate().unwrap_err().to_string().contains("WINDOW"));
    }

    #[test]
    fn test_validate_redis_without_host() {
        let config = Config {
            cache: CacheConfig {
                store: StoreKind::Redis,
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("REDIS_HOST"));
    }

    #[test]
    fn test_validate_invalid_header_name() {
        let mut config = Config::default();
        config
            .security
            .headers
            .insert("Bad Header".to_string(), "x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_masking_without_fields() {
        let mut config = Config::default();
        config.security.data_protection = Some(DataProtectionConfig {
            enabled: true,
            masking: MaskingConfig {
                enabled: true,
                fields: vec![],
                style: MaskStyle::Fixed,
            },
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_password_redacted_in_debug() {
        let redis = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            password: Some("s3cret".to_string()),
            db: 2,
        };
        assert!(!format!("{redis:?}").contains("s3cret"));
    }

    #[test]
    fn test_memo_key_redacted_in_debug() {
        let password = PasswordPolicyConfig {
            memo_key: Some("shared-memo-secret".to_string()),
            ..PasswordPolicyConfig::default()
        };
        assert!(!format!("{password:?}").contains("shared-memo-secret"));
    }

    #[test]
    fn test_parse_header_spec() {
        let headers =
            parse_header_spec("X-App-Version: 1.2; Permissions-Policy: geolocation=()").unwrap();
        assert_eq!(headers.get("X-App-Version").unwrap(), "1.2");
        assert_eq!(headers.get("Permissions-Policy").unwrap(), "geolocation=()");
        assert!(parse_header_spec("").unwrap().is_empty());
        assert!(parse_header_spec("no-colon").is_err());
    }

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("Redis".parse::<StoreKind>().unwrap(), StoreKind::Redis);
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert!("memcached".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_security_config_deserializes_with_absent_blocks() {
        let json = r#"{"rate_limit": {"enabled": true, "max": 2, "window_ms": 60000}}"#;
        let config: SecurityConfig = serde_json::from_str(json).unwrap();
        assert!(config.rate_limit_enabled());
        assert_eq!(config.rate_limit.unwrap().max, 2);
        // serde(default) fills unspecified blocks from Default
        assert!(config.helmet);
    }

    #[test]
    fn test_empty_security_config_disables_everything() {
        let config = SecurityConfig::empty();
        assert!(!config.rate_limit_enabled());
        assert!(!config.password_policy_enabled());
        assert!(!config.headers_enabled());
        assert!(!config.audit_enabled());
        assert!(!config.masking_enabled());
    }
}
