//! Axum router construction.
//!
//! Builds the full application router with all route groups and middleware
//! layers.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Gated API routes.
    let api = Router::new()
        .route("/providers", get(routes::providers::list_providers))
        .route("/records", get(routes::records::list_records))
        .route("/records/{key}", get(routes::records::get_record))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/v1", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
