//! Fuzz testing for the password predicate and cache-key serializer.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_security -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `validate_password` never panics and agrees with `violations`
//! - `CacheKey::serialize` stays injective: distinct identifiers under the
//!   same prefix and category never collide

#![no_main]

use arbitrary::Arbitrary;
use compliance_guard::{CacheCategory, CacheKey, PasswordPolicy, validate_password};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    password: &'a str,
    min_length: u8,
    require_uppercase: bool,
    require_lowercase: bool,
    require_numbers: bool,
    require_special_chars: bool,
    prefix: &'a str,
    left: &'a str,
    right: &'a str,
    bucket: Option<i64>,
}

fuzz_target!(|input: Input<'_>| {
    let policy = PasswordPolicy {
        min_length: usize::from(input.min_length),
        require_uppercase: input.require_uppercase,
        require_lowercase: input.require_lowercase,
        require_numbers: input.require_numbers,
        require_special_chars: input.require_special_chars,
    };
    let valid = validate_password(input.password, &policy);
    assert_eq!(valid, policy.violations(input.password).is_empty());

    let key = |identifier: &str| {
        let key = CacheKey::new(CacheCategory::RateLimit, identifier);
        match input.bucket {
            Some(bucket) => key.with_bucket(bucket),
            None => key,
        }
    };
    if input.left != input.right {
        assert_ne!(
            key(input.left).serialize(input.prefix),
            key(input.right).serialize(input.prefix)
        );
    }
});
