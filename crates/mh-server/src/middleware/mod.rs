//! HTTP middleware: request ID and the request gate.

pub mod auth;
pub mod request_id;
