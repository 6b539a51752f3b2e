//! Canonical record get, upsert, and listing.
//!
//! Every statement goes through `prepare_cached`; whether that actually caches
//! is decided per connection by the pool (see `DatabaseConfig::prepared_stmt`).

use mh_core::{CanonicalRecord, Error, LookupKey, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{record_from_row, EncodedRecord, RECORD_COLS};

/// Get a record by key.
pub fn get_record(conn: &Connection, key: &LookupKey) -> Result<Option<CanonicalRecord>> {
    let q = format!("SELECT {RECORD_COLS} FROM records WHERE lookup_key = ?1");
    let mut stmt = conn
        .prepare_cached(&q)
        .map_err(|e| Error::store(e.to_string()))?;
    stmt.query_row([key.as_str()], record_from_row)
        .optional()
        .map_err(|e| Error::store(e.to_string()))
}

/// Insert or replace the record for its key.
///
/// The write is monotonic and idempotent: an existing row is only replaced
/// when the incoming record is at least as new *and* differs from it.
/// Returns whether a row was written.
pub fn upsert_record(conn: &Connection, record: &CanonicalRecord) -> Result<bool> {
    if record.sources.is_empty() {
        return Err(Error::Validation(format!(
            "record {} has no provenance",
            record.key
        )));
    }

    let enc = EncodedRecord::encode(record).map_err(|e| Error::store(e.to_string()))?;

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO records (lookup_key, fields, field_sources, sources, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(lookup_key) DO UPDATE SET
                fields = excluded.fields,
                field_sources = excluded.field_sources,
                sources = excluded.sources,
                updated_at = excluded.updated_at
             WHERE excluded.updated_at >= records.updated_at
               AND (records.fields <> excluded.fields
                    OR records.field_sources <> excluded.field_sources
                    OR records.sources <> excluded.sources
                    OR records.updated_at <> excluded.updated_at)",
        )
        .map_err(|e| Error::store(e.to_string()))?;

    let n = stmt
        .execute(rusqlite::params![
            record.key.as_str(),
            enc.fields,
            enc.field_sources,
            enc.sources,
            enc.updated_at,
        ])
        .map_err(|e| Error::store(e.to_string()))?;
    Ok(n > 0)
}

/// List records newest first with offset/limit pagination.
pub fn list_records(conn: &Connection, offset: i64, limit: i64) -> Result<Vec<CanonicalRecord>> {
    let q = format!(
        "SELECT {RECORD_COLS} FROM records
         ORDER BY updated_at DESC, lookup_key ASC LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn
        .prepare_cached(&q)
        .map_err(|e| Error::store(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![limit, offset], record_from_row)
        .map_err(|e| Error::store(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::store(e.to_string()))?;
    Ok(rows)
}

/// Count stored records.
pub fn count_records(conn: &Connection) -> Result<u64> {
    let mut stmt = conn
        .prepare_cached("SELECT COUNT(*) FROM records")
        .map_err(|e| Error::store(e.to_string()))?;
    let n: i64 = stmt
        .query_row([], |row| row.get(0))
        .map_err(|e| Error::store(e.to_string()))?;
    Ok(n.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};
    use chrono::{DateTime, Utc};
    use mh_core::{field, Fields, ProviderId};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn record(key: &str, title: &str, updated_ms: i64) -> CanonicalRecord {
        let provider = ProviderId::parse("alpha").unwrap();
        let mut fields = Fields::new();
        fields.insert(field::TITLE.into(), json!(title));
        fields.insert(field::GENRES.into(), json!(["drama", "mystery"]));
        let field_sources = fields
            .keys()
            .map(|k| (k.clone(), provider.clone()))
            .collect::<BTreeMap<_, _>>();
        CanonicalRecord {
            key: LookupKey::parse(key).unwrap(),
            fields,
            field_sources,
            sources: BTreeSet::from([provider]),
            updated_at: DateTime::<Utc>::from_timestamp_millis(updated_ms).unwrap(),
        }
    }

    #[test]
    fn get_missing_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let key = LookupKey::parse("nope-1").unwrap();
        assert!(get_record(&conn, &key).unwrap().is_none());
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let rec = record("abc-1", "First", 1_700_000_000_123);

        assert!(upsert_record(&conn, &rec).unwrap());
        let loaded = get_record(&conn, &rec.key).unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn upsert_is_idempotent() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let rec = record("abc-1", "First", 1_700_000_000_000);

        assert!(upsert_record(&conn, &rec).unwrap());
        assert!(!upsert_record(&conn, &rec).unwrap());
        assert_eq!(count_records(&conn).unwrap(), 1);
        assert_eq!(get_record(&conn, &rec.key).unwrap().unwrap(), rec);
    }

    #[test]
    fn newer_record_replaces_older() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        upsert_record(&conn, &record("abc-1", "Old", 1_000)).unwrap();
        assert!(upsert_record(&conn, &record("abc-1", "New", 2_000)).unwrap());

        let loaded = get_record(&conn, &LookupKey::parse("abc-1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.text(field::TITLE), Some("New"));
        assert_eq!(count_records(&conn).unwrap(), 1);
    }

    #[test]
    fn older_record_never_overwrites_newer() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        upsert_record(&conn, &record("abc-1", "New", 2_000)).unwrap();
        assert!(!upsert_record(&conn, &record("abc-1", "Old", 1_000)).unwrap());

        let loaded = get_record(&conn, &LookupKey::parse("abc-1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.text(field::TITLE), Some("New"));
    }

    #[test]
    fn empty_provenance_is_rejected() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let mut rec = record("abc-1", "First", 1_000);
        rec.sources.clear();
        assert!(matches!(
            upsert_record(&conn, &rec),
            Err(Error::Validation(_))
        ));
        assert_eq!(count_records(&conn).unwrap(), 0);
    }

    #[test]
    fn list_is_newest_first_and_paginated() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        for (i, key) in ["a-1", "b-2", "c-3"].iter().enumerate() {
            upsert_record(&conn, &record(key, "t", 1_000 + i as i64)).unwrap();
        }

        let page = list_records(&conn, 0, 2).unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["C-3", "B-2"]);

        let rest = list_records(&conn, 2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key.as_str(), "A-1");
    }

    #[test]
    fn corrupt_row_is_an_error_not_empty() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        conn.execute(
            "INSERT INTO records (lookup_key, fields, field_sources, sources, updated_at)
             VALUES ('BAD-1', 'not json', '{}', '[\"alpha\"]', 0)",
            [],
        )
        .unwrap();
        let err = get_record(&conn, &LookupKey::parse("bad-1").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }
}
