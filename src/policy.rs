//! Password policy predicate.
//!
//! Validation is a pure function of the password and the policy: it checks
//! length and character-class membership only. Classes are ASCII classes;
//! non-ASCII letters count toward length but satisfy no class requirement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Characters accepted for the special-character requirement.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Password shape requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special_chars: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special_chars: true,
        }
    }
}

/// A single policy requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyRule {
    MinLength,
    Uppercase,
    Lowercase,
    Number,
    SpecialChar,
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PolicyRule::MinLength => "minimum length",
            PolicyRule::Uppercase => "uppercase letter",
            PolicyRule::Lowercase => "lowercase letter",
            PolicyRule::Number => "number",
            PolicyRule::SpecialChar => "special character",
        };
        f.write_str(text)
    }
}

impl PasswordPolicy {
    /// Rules the password fails, in a fixed order. Empty means compliant.
    pub fn violations(&self, password: &str) -> Vec<PolicyRule> {
        let mut failed = Vec::new();

        if password.chars().count() < self.min_length {
            failed.push(PolicyRule::MinLength);
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            failed.push(PolicyRule::Uppercase);
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            failed.push(PolicyRule::Lowercase);
        }
        if self.require_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
            failed.push(PolicyRule::Number);
        }
        if self.require_special_chars && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c))
        {
            failed.push(PolicyRule::SpecialChar);
        }

        failed
    }

    pub fn is_satisfied_by(&self, password: &str) -> bool {
        self.violations(password).is_empty()
    }

    /// Compact, stable encoding of the policy, e.g. `8:ULNS`.
    ///
    /// Used to scope memoized decisions so that a policy change never
    /// replays a decision made under the old rules.
    pub fn fingerprint(&self) -> String {
        let flags: String = [
            (self.require_uppercase, 'U'),
            (self.require_lowercase, 'L'),
            (self.require_numbers, 'N'),
            (self.require_special_chars, 'S'),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, flag)| *flag)
        .collect();
        format!("{}:{}", self.min_length, flags)
    }
}

/// `true` iff `password` satisfies every rule of `policy`.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> bool {
    policy.is_satisfied_by(password)
}
