//! Opening the store.
//!
//! Every handle gets WAL (so readers never wait on the background writer)
//! and foreign keys (generation deletes cascade to entries) before the
//! schema is migrated.

use std::path::Path;

use super::migrations;
use crate::Error;
use tokio_rusqlite::Connection;

/// Connection settings, applied in order on open.
const PRAGMAS: &[(&str, &str)] =
    &[("journal_mode", "WAL"), ("synchronous", "NORMAL"), ("temp_store", "MEMORY"), ("foreign_keys", "ON")];

/// Handle to the response store.
///
/// Queries run on tokio-rusqlite's background thread; clones share it.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open (or create) the store file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::prepare(Connection::open(path).await?).await
    }

    /// Private in-memory store, used by tests and throwaway hosts.
    pub async fn open_in_memory() -> Result<Self, Error> {
        Self::prepare(Connection::open_in_memory().await?).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        let batch: String = PRAGMAS.iter().map(|(name, value)| format!("PRAGMA {name}={value};\n")).collect();
        conn.call(move |conn| conn.execute_batch(&batch)).await.map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}
