//! Storage layer: classification records, the durable cache, and SQLite
//! pool setup for launcher databases.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

pub mod cache;
pub mod legacy;
pub mod models;

pub use cache::{CacheError, ClassificationStore, JsonFileStore, MemoryStore};
pub use models::{CacheStats, Category, ClassificationRecord, Source, Status};

/// How a launcher database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Never writes, never takes locks. Used for extraction from a backup.
    ReadOnly,
    /// Writable, file must exist. Used on staged copies.
    ReadWrite,
    /// Writable, created when missing.
    Create,
}

pub async fn connect(path: &Path, mode: OpenMode) -> Result<SqlitePool, sqlx::Error> {
    let mut opts = SqliteConnectOptions::new().filename(path);
    opts = match mode {
        OpenMode::ReadOnly => opts.read_only(true).immutable(true),
        OpenMode::ReadWrite => opts.create_if_missing(false),
        OpenMode::Create => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            opts.create_if_missing(true)
        }
    };
    // One connection keeps transactions and the journal on a single handle.
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
}
