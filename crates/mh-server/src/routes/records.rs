//! Record resolution and listing routes.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use mh_core::CanonicalRecord;
use mh_engine::{Origin, ProviderFailure, Resolution, ResolveOptions};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Largest page `GET /v1/records` returns.
pub const MAX_LIMIT: u64 = 500;

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

/// Query parameters for resolving one record.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveParams {
    /// Caller deadline in milliseconds; capped at the server default.
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub refresh: bool,
}

/// A resolved record with provenance and resolution details.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub origin: Origin,
    pub partial: bool,
    pub missing: Vec<ProviderFailure>,
    pub persisted: bool,
}

impl From<Resolution> for RecordResponse {
    fn from(res: Resolution) -> Self {
        Self {
            partial: res.is_partial(),
            record: res.record,
            origin: res.origin,
            missing: res.missing,
            persisted: res.persisted,
        }
    }
}

/// GET /v1/records/{key}
pub async fn get_record(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(key): Path<String>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<RecordResponse>, AppError> {
    let opts = ResolveOptions {
        timeout: params.timeout_ms.map(Duration::from_millis),
        refresh: params.refresh,
    };

    match ctx.engine.resolve(&key, opts).await {
        Ok(res) => Ok(Json(res.into())),
        Err(e) => Err(AppError::from(e).with_request_id(request_id.into_string())),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Query parameters for listing stored records.
#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ListRecordsResponse {
    pub records: Vec<CanonicalRecord>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// GET /v1/records
pub async fn list_records(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<ListRecordsParams>,
) -> Result<Json<ListRecordsResponse>, AppError> {
    let limit = params.limit.min(MAX_LIMIT);
    let (records, total) = ctx
        .engine
        .list_records(params.offset, limit)
        .await
        .map_err(|e| AppError::new(e).with_request_id(request_id.into_string()))?;

    Ok(Json(ListRecordsResponse {
        records,
        total,
        offset: params.offset,
        limit,
    }))
}
