//! Correlation ids.
//!
//! A caller may supply `x-request-id`; it is reused when it is a short token
//! of visible ASCII (letters, digits and `._:-`). Anything else is replaced
//! by a fresh UUID so that log lines and error bodies never echo arbitrary
//! header bytes. The id is stored in the request extensions, attached to a
//! tracing span around the handler, and returned on the response.

use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_ID_LEN: usize = 128;

/// Correlation id of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// The caller's id, if it is acceptable.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(&X_REQUEST_ID)?.to_str().ok()?;
        is_acceptable(raw).then(|| Self(raw.to_owned()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_acceptable(id: &str) -> bool {
    (1..=MAX_ID_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
}

pub async fn request_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let id = RequestId::from_headers(request.headers()).unwrap_or_else(RequestId::generate);
    let header = HeaderValue::from_str(id.as_str()).ok();

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    request.extensions_mut().insert(id);

    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}
