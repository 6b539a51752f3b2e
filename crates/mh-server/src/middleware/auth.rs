//! The request gate.
//!
//! Every `/v1` request passes through [`auth_middleware`], which extracts an
//! `Authorization: Bearer` credential and asks the configured [`Authorizer`].
//! `/health` is mounted outside the gate.

use std::fmt;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use mh_core::config::AuthConfig;
use rand::RngCore;
use sha2::Sha256;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

type HmacSha256 = Hmac<Sha256>;

/// Decides whether a request may proceed.
pub trait Authorizer: Send + Sync {
    /// `credential` is the bearer token, if the request carried one.
    fn authorize(&self, credential: Option<&str>) -> bool;
}

/// Admits everything. Used when no token is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl Authorizer for OpenGate {
    fn authorize(&self, _credential: Option<&str>) -> bool {
        true
    }
}

/// Admits requests bearing one shared token.
///
/// Only an HMAC tag of the token is kept, under a key drawn at startup;
/// candidates are tagged the same way and compared in constant time.
pub struct TokenGate {
    key: [u8; 32],
    tag: Vec<u8>,
}

impl TokenGate {
    pub fn new(token: &str) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let tag = mac(&key, token)
            .map(|m| m.finalize().into_bytes().to_vec())
            .unwrap_or_default();
        Self { key, tag }
    }
}

fn mac(key: &[u8], data: &str) -> Option<HmacSha256> {
    let mut m = HmacSha256::new_from_slice(key).ok()?;
    m.update(data.as_bytes());
    Some(m)
}

impl Authorizer for TokenGate {
    fn authorize(&self, credential: Option<&str>) -> bool {
        let Some(candidate) = credential else {
            return false;
        };
        if self.tag.is_empty() {
            return false;
        }
        mac(&self.key, candidate).is_some_and(|m| m.verify_slice(&self.tag).is_ok())
    }
}

impl fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGate").finish_non_exhaustive()
    }
}

/// Pick the gate for `auth`: a token gate when a non-blank token is set.
pub fn gate_from_config(auth: &AuthConfig) -> Arc<dyn Authorizer> {
    match auth.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => {
            tracing::info!("Request gate enabled");
            Arc::new(TokenGate::new(token))
        }
        _ => {
            tracing::info!("No token configured; request gate is open");
            Arc::new(OpenGate)
        }
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Gate middleware. Applied to `/v1` routes only.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if ctx.gate.authorize(bearer_token(request.headers())) {
        return Ok(next.run(request).await);
    }

    tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
    let mut err = AppError::new(mh_core::Error::Unauthorized(
        "missing or invalid bearer token".into(),
    ));
    if let Some(rid) = request.extensions().get::<RequestId>() {
        err = err.with_request_id(rid.as_str());
    }
    Err(err)
}
