//! Liveness and store readiness.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_ready: bool,
    pub in_flight: usize,
}

/// GET /health
pub async fn health_check(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store_ready: ctx.engine.ready().await,
        in_flight: ctx.engine.in_flight(),
    })
}
