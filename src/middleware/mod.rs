//! Security middleware stages.
//!
//! Each stage is a tower [`Layer`](tower::Layer) whose service fails with a
//! boxed error, so any stage can forward a [`SecurityError`] to the terminal
//! [`error_handler`]:
//!
//! - **Rate Limiting**: Fixed-window counters per client identifier
//! - **Password Policy**: Registration-route password checks, memoized
//! - **Security Headers**: Baseline and custom response headers, cached per path
//! - **Audit**: One structured record per method+path per minute
//! - **Data Masking**: Placeholder values for sensitive response fields
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limit → Password → Headers → Audit → Handler
//!              ↓            ↓          ↓        ↓        ↓
//!             429          400        500      500    Masking → Response
//! ```
//!
//! [`SecurityError`]: crate::error::SecurityError

pub mod audit;
pub mod error_handler;
pub mod ip;
pub mod masking;
pub mod password_policy;
pub mod rate_limit;
pub mod security_headers;

pub use audit::{AuditLayer, AuditRecord, AuditSink, TracingAuditSink};
pub use error_handler::{handle_error, handle_panic};
pub use ip::{
    CidrRange, TrustedProxyConfig, UNKNOWN_IP, extract_client_ip, extract_client_ip_with_validation,
};
pub use masking::{MaskStyle, MaskingLayer, mask_fields, mask_value};
pub use password_policy::PasswordPolicyLayer;
pub use rate_limit::{MaxRequests, RateLimitLayer, RejectionMode, WindowCounter};
pub use security_headers::{HeaderComposer, SecurityHeadersLayer};
