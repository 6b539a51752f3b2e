//! mh-db: persistence layer for canonical records.
//!
//! This crate provides SQLite-backed storage with configurable connection
//! pooling, embedded migrations, row models, and the [`RecordStore`] trait the
//! aggregation engine talks to.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use store::{RecordStore, SqliteStore};
