//! Structured cache keys.
//!
//! Every physical key is `prefix:category:identifier[:time_bucket]`. The
//! category is a closed enum, the bucket is an integer, and `:`/`\` inside
//! the prefix or identifier are backslash-escaped, so two distinct keys can
//! never serialize to the same string. Serialization is pure and contains
//! nothing random, so keys are stable across restarts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delimiter between key segments.
pub const KEY_DELIMITER: char = ':';

/// Namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheCategory {
    RateLimit,
    PasswordPolicy,
    SecurityHeaders,
    AuditLog,
}

impl CacheCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate-limit",
            Self::PasswordPolicy => "password-policy",
            Self::SecurityHeaders => "security-headers",
            Self::AuditLog => "audit-log",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: CacheCategory,
    identifier: String,
    time_bucket: Option<i64>,
}

impl CacheKey {
    pub fn new(category: CacheCategory, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
            time_bucket: None,
        }
    }

    /// Scope the key to a time bucket (e.g. `floor(now / window)`).
    pub fn with_bucket(mut self, bucket: i64) -> Self {
        self.time_bucket = Some(bucket);
        self
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn time_bucket(&self) -> Option<i64> {
        self.time_bucket
    }

    /// Physical key under `prefix`.
    pub fn serialize(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(prefix.len() + self.identifier.len() + 32);
        push_escaped(&mut out, prefix);
        out.push(KEY_DELIMITER);
        out.push_str(self.category.as_str());
        out.push(KEY_DELIMITER);
        push_escaped(&mut out, &self.identifier);
        if let Some(bucket) = self.time_bucket {
            out.push(KEY_DELIMITER);
            out.push_str(&bucket.to_string());
        }
        out
    }
}

/// Leading portion shared by every key under `prefix` (`prefix:`).
pub fn prefix_scope(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    push_escaped(&mut out, prefix);
    out.push(KEY_DELIMITER);
    out
}

fn push_escaped(out: &mut String, segment: &str) {
    for c in segment.chars() {
        if c == KEY_DELIMITER || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}
