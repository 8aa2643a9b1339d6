//! Storage module for persisting crawl sessions
//!
//! This module handles the checkpoint side of the database:
//! - SQLite database initialization and schema management
//! - Atomic per-page session checkpoints
//! - Resumable session lookup and listing
//! - Cooperative cancellation flags and the single-writer lease

mod schema;
mod sqlite;
mod traits;

pub use schema::initialize_schema;
pub(crate) use sqlite::{from_db_time, to_db_time};
pub use sqlite::{open_connection, SqliteStorage};
pub use traits::{CheckpointStore, PageOutcome, StorageError, StorageResult};
