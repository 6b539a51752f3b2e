//! Generic JSON-over-HTTP metadata provider.
//!
//! Each configured upstream is a URL template with a `{key}` placeholder.
//! The response body is either a flat JSON object of fields or an envelope
//! `{"key": ..., "fields": {...}}`. Requests are rate-limited per provider.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use mh_core::config::ProviderConfig;
use mh_core::{Fields, LookupKey, ProviderId, ProviderResult};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Instant;

use crate::provider::{Provider, ProviderError};

const KEY_PLACEHOLDER: &str = "{key}";

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpProvider {
    id: ProviderId,
    weight: i32,
    http: reqwest::Client,
    url_template: String,
    api_key: Option<String>,
    limiter: Option<Arc<Limiter>>,
}

impl HttpProvider {
    pub fn new(id: ProviderId, url_template: impl Into<String>) -> Self {
        Self {
            id,
            weight: 0,
            http: reqwest::Client::new(),
            url_template: url_template.into(),
            api_key: None,
            limiter: None,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Cap outgoing requests per second; 0 disables the limit.
    #[must_use]
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))));
        self
    }

    pub fn from_config(cfg: &ProviderConfig) -> mh_core::Result<Self> {
        let id = ProviderId::parse(&cfg.name)?;
        if cfg.url.trim().is_empty() {
            return Err(mh_core::Error::Validation(format!(
                "provider '{id}' has an empty url"
            )));
        }
        let mut provider = Self::new(id, cfg.url.trim())
            .with_weight(cfg.weight)
            .with_rate_limit(cfg.rate_per_second);
        if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
            provider = provider.with_api_key(key);
        }
        Ok(provider)
    }

    fn url_for(&self, key: &LookupKey) -> String {
        self.url_template.replace(KEY_PLACEHOLDER, key.as_str())
    }

    async fn request(&self, key: &LookupKey) -> Result<ProviderResult, ProviderError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let mut req = self
            .http
            .get(self.url_for(key))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::upstream(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::not_found(format!("{} has no record", self.id)));
        }
        if !status.is_success() {
            return Err(ProviderError::upstream(format!("HTTP {status}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::upstream(format!("body read failed: {e}")))?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::malformed(format!("invalid JSON: {e}")))?;

        let fields = extract_fields(key, value)?;
        let mut result = ProviderResult::new(key.clone(), self.id.clone()).with_weight(self.weight);
        result.fields = fields;
        Ok(result)
    }
}

/// Pull the field map out of a response body.
fn extract_fields(key: &LookupKey, body: Value) -> Result<Fields, ProviderError> {
    let Value::Object(mut obj) = body else {
        return Err(ProviderError::malformed("response is not a JSON object"));
    };

    if let Some(echoed) = obj.remove("key") {
        let matches = echoed
            .as_str()
            .and_then(|s| LookupKey::parse(s).ok())
            .is_some_and(|k| &k == key);
        if !matches {
            return Err(ProviderError::malformed(format!(
                "response is for key {echoed} (expected {key})"
            )));
        }
    }

    match obj.remove("fields") {
        Some(Value::Object(fields)) => Ok(fields.into_iter().collect()),
        Some(_) => Err(ProviderError::malformed("\"fields\" is not an object")),
        None => Ok(obj.into_iter().collect()),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn fetch(
        &self,
        key: &LookupKey,
        deadline: Instant,
    ) -> Result<ProviderResult, ProviderError> {
        match tokio::time::timeout_at(deadline, self.request(key)).await {
            Ok(res) => res,
            Err(_) => Err(ProviderError::timeout(format!(
                "{} did not answer before the deadline",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderErrorKind;
    use mh_core::field;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key() -> LookupKey {
        LookupKey::parse("abc-123").unwrap()
    }

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(
            ProviderId::parse("alpha").unwrap(),
            format!("{}/records/{{key}}", server.uri()),
        )
        .with_weight(4)
    }

    fn later(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn flat_object_becomes_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records/ABC-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "A Title",
                "genres": ["drama"]
            })))
            .mount(&server)
            .await;

        let result = provider(&server).fetch(&key(), later(2_000)).await.unwrap();
        assert_eq!(result.key, key());
        assert_eq!(result.provider.as_str(), "alpha");
        assert_eq!(result.weight, 4);
        assert_eq!(result.fields[field::TITLE], json!("A Title"));
        assert_eq!(result.fields[field::GENRES], json!(["drama"]));
    }

    #[tokio::test]
    async fn envelope_with_matching_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/records/ABC-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "abc_123",
                "fields": {"title": "Enveloped"}
            })))
            .mount(&server)
            .await;

        let result = provider(&server).fetch(&key(), later(2_000)).await.unwrap();
        assert_eq!(result.fields.len(), 1);
        assert_eq!(result.fields[field::TITLE], json!("Enveloped"));
    }

    #[tokio::test]
    async fn mismatched_key_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "zzz-999",
                "title": "Wrong"
            })))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Malformed);
    }

    #[tokio::test]
    async fn not_found_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Upstream);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn non_object_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1, 2, 3]"))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Malformed);
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = provider(&server).fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Malformed);
    }

    #[tokio::test]
    async fn slow_response_times_out_at_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"title": "Late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = provider(&server).fetch(&key(), later(100)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn sends_bearer_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer k3y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Authed"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server)
            .with_api_key("k3y")
            .fetch(&key(), later(2_000))
            .await
            .unwrap();
        assert_eq!(result.fields[field::TITLE], json!("Authed"));
    }

    #[tokio::test]
    async fn unreachable_host_is_upstream() {
        let p = HttpProvider::new(ProviderId::parse("alpha").unwrap(), "http://127.0.0.1:1/{key}");
        let err = p.fetch(&key(), later(2_000)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Upstream);
    }

    #[test]
    fn from_config_validates() {
        let mut cfg = ProviderConfig {
            name: "Alpha".into(),
            url: "http://example.test/{key}".into(),
            weight: 2,
            api_key: Some(String::new()),
            rate_per_second: 0,
            enabled: true,
        };
        let p = HttpProvider::from_config(&cfg).unwrap();
        assert_eq!(p.id().as_str(), "alpha");
        assert_eq!(p.weight(), 2);
        assert!(p.api_key.is_none());
        assert!(p.limiter.is_none());
        assert_eq!(p.url_for(&key()), "http://example.test/ABC-123");

        cfg.url = "  ".into();
        assert!(HttpProvider::from_config(&cfg).is_err());
    }
}
