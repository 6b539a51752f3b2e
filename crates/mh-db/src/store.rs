//! The store adapter seam between the engine and persistence.
//!
//! [`RecordStore`] is deliberately synchronous: SQLite work is blocking, so the
//! engine calls it from `spawn_blocking` and the adapter stays free of async.

use mh_core::config::DatabaseConfig;
use mh_core::{CanonicalRecord, LookupKey, Result};

use crate::migrations;
use crate::pool::{self, DbPool};
use crate::queries::records;

/// Persistent cache and system of record for canonical records.
pub trait RecordStore: Send + Sync {
    /// Fetch the stored record for `key`, if any.
    fn get(&self, key: &LookupKey) -> Result<Option<CanonicalRecord>>;

    /// Insert or replace the record for its key; `true` when a row changed.
    fn upsert(&self, record: &CanonicalRecord) -> Result<bool>;

    /// Whether the schema is current and a connection can be obtained.
    fn ready(&self) -> bool;

    /// Provision or update the schema. Idempotent.
    fn migrate(&self) -> Result<()>;

    /// Stored records, newest first.
    fn list(&self, offset: u64, limit: u64) -> Result<Vec<CanonicalRecord>>;

    /// Number of stored records.
    fn count(&self) -> Result<u64>;
}

/// [`RecordStore`] over an r2d2 SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open a store according to `cfg`. Does not migrate.
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            pool: pool::open_pool(cfg)?,
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, key: &LookupKey) -> Result<Option<CanonicalRecord>> {
        let conn = pool::get_conn(&self.pool)?;
        records::get_record(&conn, key)
    }

    fn upsert(&self, record: &CanonicalRecord) -> Result<bool> {
        let conn = pool::get_conn(&self.pool)?;
        records::upsert_record(&conn, record)
    }

    fn ready(&self) -> bool {
        let conn = match pool::get_conn(&self.pool) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "Store readiness check could not connect");
                return false;
            }
        };
        match migrations::current_version(&conn) {
            Ok(Some(v)) => v >= migrations::latest_version(),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(error = %e, "Store readiness check failed");
                false
            }
        }
    }

    fn migrate(&self) -> Result<()> {
        let conn = pool::get_conn(&self.pool)?;
        migrations::run_migrations(&conn)
    }

    fn list(&self, offset: u64, limit: u64) -> Result<Vec<CanonicalRecord>> {
        let conn = pool::get_conn(&self.pool)?;
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        records::list_records(&conn, offset, limit)
    }

    fn count(&self) -> Result<u64> {
        let conn = pool::get_conn(&self.pool)?;
        records::count_records(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mh_core::record::truncate_millis;
    use mh_core::{field, Fields, ProviderId};
    use std::collections::{BTreeMap, BTreeSet};

    fn sample(key: &str) -> CanonicalRecord {
        let provider = ProviderId::parse("alpha").unwrap();
        let mut fields = Fields::new();
        fields.insert(field::TITLE.into(), serde_json::json!("Sample"));
        CanonicalRecord {
            key: LookupKey::parse(key).unwrap(),
            fields,
            field_sources: BTreeMap::from([(field::TITLE.to_string(), provider.clone())]),
            sources: BTreeSet::from([provider]),
            updated_at: truncate_millis(Utc::now()),
        }
    }

    #[test]
    fn not_ready_until_migrated() {
        let store = SqliteStore::open(&DatabaseConfig::default()).unwrap();
        assert!(!store.ready());
        store.migrate().unwrap();
        assert!(store.ready());
        // Idempotent.
        store.migrate().unwrap();
        assert!(store.ready());
    }

    #[test]
    fn unmigrated_store_errors_on_use() {
        let store = SqliteStore::open(&DatabaseConfig::default()).unwrap();
        let key = LookupKey::parse("abc-1").unwrap();
        assert!(store.get(&key).is_err());
    }

    #[test]
    fn round_trip_through_trait_object() {
        let store: Box<dyn RecordStore> =
            Box::new(SqliteStore::from_pool(pool::init_memory_pool().unwrap()));
        let rec = sample("abc-1");
        assert!(store.upsert(&rec).unwrap());
        assert_eq!(store.get(&rec.key).unwrap(), Some(rec));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.list(0, 10).unwrap().len(), 1);
        assert!(store.list(1, 10).unwrap().is_empty());
    }

    #[test]
    fn unreachable_file_is_not_ready() {
        let cfg = DatabaseConfig {
            dsn: "/nonexistent-dir/metahub.db".into(),
            acquire_timeout_secs: 1,
            ..DatabaseConfig::default()
        };
        let store = SqliteStore::open(&cfg).unwrap();
        assert!(!store.ready());
        assert!(store.migrate().unwrap_err().is_retryable());
    }
}
