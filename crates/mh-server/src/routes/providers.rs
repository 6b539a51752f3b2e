//! Configured provider listing.

use axum::extract::State;
use axum::Json;
use mh_engine::ProviderInfo;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
}

/// GET /v1/providers
pub async fn list_providers(State(ctx): State<AppContext>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: ctx.engine.providers().describe(),
    })
}
