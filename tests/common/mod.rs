//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory store, a config, and
//! a full [`AppContext`]. The [`TestHarness::with_server`] constructor starts
//! Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mh_core::config::{Config, ProviderConfig};
use mh_db::pool::init_memory_pool;
use mh_db::{RecordStore, SqliteStore};
use mh_server::context::AppContext;
use mh_server::router::build_router;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory store.
pub struct TestHarness {
    pub ctx: AppContext,
    pub store: Arc<SqliteStore>,
}

impl TestHarness {
    /// Create a new harness with test configuration and no providers.
    pub fn new() -> Self {
        Self::with_config(test_config(Vec::new()))
    }

    /// Create a new harness with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(SqliteStore::from_pool(
            init_memory_pool().expect("failed to create in-memory pool"),
        ));
        let ctx = AppContext::from_config(store.clone() as Arc<dyn RecordStore>, config)
            .expect("failed to build context");
        Self { ctx, store }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Number of records persisted in the store.
    pub fn stored(&self) -> u64 {
        self.store.count().expect("count failed")
    }
}

/// Config tuned for tests: short caps, no grace period, open gate.
pub fn test_config(providers: Vec<ProviderConfig>) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.engine.request_timeout_secs = 5;
    config.engine.late_grace_secs = 0;
    config.providers = providers;
    config
}

/// Provider config pointing at `server` with `/{name}/{key}` lookups.
pub fn provider(name: &str, server: &MockServer, weight: i32) -> ProviderConfig {
    ProviderConfig {
        name: name.into(),
        url: format!("{}/{}/{{key}}", server.uri(), name),
        weight,
        api_key: None,
        rate_per_second: 0,
        enabled: true,
    }
}

/// Serve `fields` for `key` from the `name` provider, with an optional delay.
pub async fn mock_fields(server: &MockServer, name: &str, key: &str, fields: Value, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/{name}/{key}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "key": key, "fields": fields }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Answer 404 for `key` from the `name` provider.
pub async fn mock_missing(server: &MockServer, name: &str, key: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{name}/{key}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Number of requests `server` received for `name`.
pub async fn hits(server: &MockServer, name: &str) -> usize {
    let prefix = format!("/{name}/");
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().starts_with(&prefix))
        .count()
}

/// Helper to build a full URL from a socket address and path.
pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}
