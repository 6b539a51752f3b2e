//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`mh_core::Error`] so that route handlers
//! can return `Result<T, AppError>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: mh_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: impl Into<mh_core::Error>) -> Self {
        Self {
            inner: inner.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn inner(&self) -> &mh_core::Error {
        &self.inner
    }
}

impl From<mh_core::Error> for AppError {
    fn from(e: mh_core::Error) -> Self {
        Self::new(e)
    }
}

impl From<mh_engine::ResolveError> for AppError {
    fn from(e: mh_engine::ResolveError) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            if self.inner.is_retryable() {
                tracing::warn!(status = %status, error = %self.inner, "Request failed");
            } else {
                tracing::error!(
                    status = %status,
                    error = %self.inner,
                    "Server error in API handler"
                );
            }
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
