//! Registration endpoint guarded by the password policy stage.
//!
//! By the time [`register`] runs, the pipeline has already rejected weak
//! passwords, so the handler only echoes the accepted account.

use axum::Json;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    pub username: String,
    pub email: Option<String>,
    pub status: String,
}

/// Create an account.
///
/// # Request Body
///
/// ```json
/// { "username": "ada", "email": "ada@example.com", "password": "Str0ng!pass" }
/// ```
///
/// # Response Body (201)
///
/// ```json
/// { "username": "ada", "email": "ada@example.com", "status": "registered" }
/// ```
#[instrument(skip_all)]
pub async fn register(Json(request): Json<RegisterRequest>) -> (StatusCode, Json<RegisterResponse>) {
    info!(username = %request.username, "Account registered");
    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            username: request.username,
            email: request.email,
            status: "registered".to_string(),
        }),
    )
}
