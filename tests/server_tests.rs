//! End-to-end tests over a real TCP listener.
//!
//! The full application router (outer layers plus security pipeline) is
//! served on an ephemeral port and exercised with `reqwest`, so client
//! identifiers come from the socket peer exactly as in production.
//!
//! Run with: `cargo test --test server_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use compliance_guard::config::RateLimitConfig;
use compliance_guard::{AppState, Cache, Config, build_router};

struct TestServer {
    base_url: String,
    state: AppState,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let cache = Cache::memory("e2e", Duration::from_secs(60));
        let state = AppState::new(config, cache);
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start(Config::default()).await;

    let response = Client::new().get(server.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache_store"], "memory");
    server.state.shutdown().await;
}

#[tokio::test]
async fn test_registration_enforces_password_policy() {
    let server = TestServer::start(Config::default()).await;
    let client = Client::new();

    let weak = client
        .post(server.url("/api/auth/register"))
        .json(&json!({ "username": "ada", "password": "password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);
    let body: Value = weak.json().await.unwrap();
    assert_eq!(body["error"]["code"], "PASSWORD_POLICY_VIOLATION");

    let strong = client
        .post(server.url("/api/auth/register"))
        .json(&json!({ "username": "ada", "email": "ada@example.com", "password": "Str0ng!pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(strong.status(), StatusCode::CREATED);
    let body: Value = strong.json().await.unwrap();
    assert_eq!(body["status"], "registered");
    assert!(body.get("password").is_none());
    server.state.shutdown().await;
}

#[tokio::test]
async fn test_account_response_is_masked_and_hardened() {
    let server = TestServer::start(Config::default()).await;

    let response = Client::new()
        .get(server.url("/api/account"))
        .header("x-request-id", "e2e-1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers["x-request-id"], "e2e-1");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-ratelimit-limit"], "100");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ssn"], "***********");
    assert_eq!(body["apiKey"], "*".repeat("sk_live_51HqLyjWDarjtT1zdp7dc".len()));
    assert_eq!(body["creditCard"], "****************");
    assert_eq!(body["username"], "ada");
    server.state.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_by_socket_peer() {
    let mut config = Config::default();
    config.security.rate_limit = Some(RateLimitConfig {
        max: 2,
        ..RateLimitConfig::default()
    });
    let server = TestServer::start(config).await;
    let client = Client::new();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = client.get(server.url("/api/account")).send().await.unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
    server.state.shutdown().await;
}
