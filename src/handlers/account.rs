//! Account profile endpoint. Its body carries fields the masking stage hides.

use axum::Json;
use serde_json::{Value, json};
use tracing::instrument;

/// Return the caller's profile.
///
/// The `apiKey`, `ssn` and `creditCard` values leave the handler in clear
/// text; with masking enabled the client only sees placeholders.
#[instrument]
pub async fn account_profile() -> Json<Value> {
    Json(json!({
        "username": "ada",
        "email": "ada@example.com",
        "apiKey": "sk_live_51HqLyjWDarjtT1zdp7dc",
        "ssn": "123-45-6789",
        "creditCard": "4111111111111111",
        "plan": "enterprise"
    }))
}
