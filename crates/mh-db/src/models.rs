//! Row mapping between the `records` table and [`CanonicalRecord`].
//!
//! JSON-valued columns are decoded strictly: a row that no longer parses is
//! reported as a conversion failure instead of being silently emptied.

use chrono::DateTime;
use mh_core::{CanonicalRecord, LookupKey};
use rusqlite::types::Type;

/// Column list used in SELECT statements.
pub const RECORD_COLS: &str = "lookup_key, fields, field_sources, sources, updated_at";

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

/// Build a record from a row selected with [`RECORD_COLS`].
pub fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<CanonicalRecord> {
    let key: String = row.get(0)?;
    let key = LookupKey::parse(&key).map_err(|e| conversion_err(0, e))?;
    let updated_ms: i64 = row.get(4)?;
    let updated_at = DateTime::from_timestamp_millis(updated_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Integer,
            format!("timestamp out of range: {updated_ms}").into(),
        )
    })?;

    Ok(CanonicalRecord {
        key,
        fields: json_column(row, 1)?,
        field_sources: json_column(row, 2)?,
        sources: json_column(row, 3)?,
        updated_at,
    })
}

/// JSON-encoded column values for an insert/update, in [`RECORD_COLS`] order
/// after the key.
pub struct EncodedRecord {
    pub fields: String,
    pub field_sources: String,
    pub sources: String,
    pub updated_at: i64,
}

impl EncodedRecord {
    pub fn encode(record: &CanonicalRecord) -> serde_json::Result<Self> {
        Ok(Self {
            fields: serde_json::to_string(&record.fields)?,
            field_sources: serde_json::to_string(&record.field_sources)?,
            sources: serde_json::to_string(&record.sources)?,
            updated_at: record.updated_at.timestamp_millis(),
        })
    }
}
