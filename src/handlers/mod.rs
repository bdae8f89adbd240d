mod account;
mod auth;
mod health;

pub use account::account_profile;
pub use auth::{RegisterRequest, RegisterResponse, register};
pub use health::{HealthResponse, health_check};
