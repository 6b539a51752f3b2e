//! Connection pool management for SQLite via r2d2.
//!
//! The pool is shaped by [`DatabaseConfig`]: pool ceiling, warm idle
//! connections, per-connection statement caching, and whether connections are
//! checked eagerly. Migrations are *not* run here; schema provisioning is an
//! explicit startup step (see [`crate::store::SqliteStore::migrate`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mh_core::config::DatabaseConfig;
use mh_core::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// r2d2's own default ceiling, used when `max_open_conns` is 0.
pub const DEFAULT_MAX_OPEN: u32 = 10;

/// Statement cache size per connection when `prepared_stmt` is on.
pub const STATEMENT_CACHE_CAPACITY: usize = 64;

/// Open a pool according to `cfg`.
///
/// With `auto_ping` disabled the pool is built unchecked: no connection is
/// opened up front and checkouts are not tested, so an unreachable database
/// surfaces on first use (or on an explicit readiness check) rather than here.
pub fn open_pool(cfg: &DatabaseConfig) -> Result<DbPool> {
    let cache_capacity = if cfg.prepared_stmt {
        STATEMENT_CACHE_CAPACITY
    } else {
        0
    };

    let memory = cfg.is_memory();
    let manager = if memory {
        SqliteConnectionManager::file(unique_memory_uri())
    } else {
        SqliteConnectionManager::file(cfg.dsn.trim())
    };
    let manager = manager.with_init(move |conn| {
        conn.set_prepared_statement_cache_capacity(cache_capacity);
        if memory {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        } else {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )
        }
    });

    let max_size = if cfg.max_open_conns == 0 {
        DEFAULT_MAX_OPEN
    } else {
        cfg.max_open_conns
    };
    let min_idle = match cfg.max_idle_conns {
        0 if memory => Some(1),
        0 => None,
        n => Some(n.min(max_size)),
    };

    let mut builder = Pool::builder()
        .max_size(max_size)
        .min_idle(min_idle)
        .connection_timeout(Duration::from_secs(cfg.acquire_timeout_secs.max(1)))
        .test_on_check_out(cfg.auto_ping);

    // A shared-cache memory database lives only while a connection is open.
    if memory {
        builder = builder.idle_timeout(None).max_lifetime(None);
    }

    let pool = if cfg.auto_ping {
        builder
            .build(manager)
            .map_err(|e| Error::store_unavailable(format!("Failed to create connection pool: {e}")))?
    } else {
        builder.build_unchecked(manager)
    };

    tracing::debug!(
        max_size,
        min_idle = ?min_idle,
        prepared_stmt = cfg.prepared_stmt,
        auto_ping = cfg.auto_ping,
        memory,
        "Database pool configured"
    );

    Ok(pool)
}

/// Initialize a migrated in-memory database pool (useful for tests).
///
/// Each call creates a uniquely-named shared-cache in-memory database so
/// that parallel tests do not interfere with each other, while all
/// connections *within* a single pool still share state.
pub fn init_memory_pool() -> Result<DbPool> {
    let cfg = DatabaseConfig {
        prepared_stmt: true,
        max_open_conns: 4,
        ..DatabaseConfig::default()
    };
    let pool = open_pool(&cfg)?;
    let conn = get_conn(&pool)?;
    migrations::run_migrations(&conn)?;
    Ok(pool)
}

/// Convenience helper to get a connection from the pool.
///
/// Exhaustion (checkout timeout) is reported as a retryable store error.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::store_unavailable(format!("Failed to get connection from pool: {e}")))
}

fn unique_memory_uri() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("file:metahub_mem_{}_{n}?mode=memory&cache=shared", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pool_defaults() {
        let pool = open_pool(&DatabaseConfig::default()).unwrap();
        assert_eq!(pool.max_size(), DEFAULT_MAX_OPEN);
    }

    #[test]
    fn max_open_is_respected() {
        let cfg = DatabaseConfig {
            max_open_conns: 3,
            max_idle_conns: 9,
            ..DatabaseConfig::default()
        };
        let pool = open_pool(&cfg).unwrap();
        assert_eq!(pool.max_size(), 3);
        assert_eq!(pool.min_idle(), Some(3));
    }

    #[test]
    fn connections_share_memory_database() {
        let pool = open_pool(&DatabaseConfig::default()).unwrap();
        let a = get_conn(&pool).unwrap();
        a.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        let b = get_conn(&pool).unwrap();
        let n: i64 = b.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn separate_pools_are_isolated() {
        let a = init_memory_pool().unwrap();
        let b = init_memory_pool().unwrap();
        get_conn(&a)
            .unwrap()
            .execute_batch("CREATE TABLE only_in_a (x INTEGER);")
            .unwrap();
        let exists: bool = get_conn(&b)
            .unwrap()
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE name = 'only_in_a'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn foreign_keys_enabled() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn exhaustion_is_retryable() {
        let cfg = DatabaseConfig {
            max_open_conns: 1,
            acquire_timeout_secs: 1,
            ..DatabaseConfig::default()
        };
        let pool = open_pool(&cfg).unwrap();
        let _held = get_conn(&pool).unwrap();
        let err = get_conn(&pool).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn file_pool_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metahub.db");
        let cfg = DatabaseConfig {
            dsn: path.to_string_lossy().into_owned(),
            ..DatabaseConfig::default()
        };
        let pool = open_pool(&cfg).unwrap();
        let conn = get_conn(&pool).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }
}
