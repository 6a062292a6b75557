//! Generation records and bulk generation operations.

use std::collections::BTreeSet;

use super::connection::CacheDb;
use super::entries::{EntryRow, now_timestamp, upsert_row};
use crate::generation::GenerationKind;
use crate::identity::RequestIdentity;
use crate::request::ProxyResponse;
use crate::Error;
use serde::Serialize;
use tokio_rusqlite::params;

/// A generation as recorded in the store.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    pub id: String,
    pub kind: GenerationKind,
    pub created_at: String,
    pub entries: u64,
}

impl CacheDb {
    /// Record a generation without entries. Re-registering is a no-op.
    pub async fn register_generation(&self, id: &str, kind: GenerationKind) -> Result<(), Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO generations (id, kind, created_at) VALUES (?1, ?2, ?3)",
                    params![id, kind.as_str(), now_timestamp()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a generation with this id has been recorded.
    pub async fn has_generation(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE id = ?1)",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Every generation id present in the store.
    pub async fn list_generation_ids(&self) -> Result<BTreeSet<String>, Error> {
        self.conn
            .call(|conn| -> Result<BTreeSet<String>, Error> {
                let mut stmt = conn.prepare("SELECT id FROM generations")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<BTreeSet<String>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(Error::from)
    }

    /// Every generation with its entry count, in creation order.
    pub async fn list_generations(&self) -> Result<Vec<GenerationRecord>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<GenerationRecord>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT g.id, g.kind, g.created_at, COUNT(e.key_hash)
                     FROM generations g LEFT JOIN entries e ON e.generation = g.id
                     GROUP BY g.id
                     ORDER BY g.rowid ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, kind, created_at, entries)| {
                        let kind = kind
                            .parse::<GenerationKind>()
                            .map_err(|e| Error::CorruptEntry(format!("generation {id}: {e}")))?;
                        Ok(GenerationRecord { id, kind, created_at, entries: entries as u64 })
                    })
                    .collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a generation and every entry tagged with it.
    ///
    /// Returns the number of deleted entries. Deleting an unknown id is a no-op.
    pub async fn delete_generation(&self, id: &str) -> Result<u64, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let entries = tx.execute("DELETE FROM entries WHERE generation = ?1", params![&id])?;
                tx.execute("DELETE FROM generations WHERE id = ?1", params![&id])?;
                tx.commit()?;
                Ok(entries as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Register a generation and write all of its entries in one transaction.
    ///
    /// `companions` are registered (empty) in the same transaction. Either
    /// every generation and entry lands or none does.
    pub async fn put_all(
        &self, generation: &str, kind: GenerationKind, entries: &[(RequestIdentity, ProxyResponse)],
        companions: &[(&str, GenerationKind)],
    ) -> Result<(), Error> {
        let generation = generation.to_string();
        let registrations: Vec<(String, GenerationKind)> = std::iter::once((generation.as_str(), kind))
            .chain(companions.iter().copied())
            .map(|(id, kind)| (id.to_string(), kind))
            .collect();
        let rows = entries
            .iter()
            .map(|(identity, response)| EntryRow::new(identity, response))
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let stored_at = now_timestamp();
                let tx = conn.transaction()?;
                for (id, kind) in &registrations {
                    tx.execute(
                        "INSERT OR IGNORE INTO generations (id, kind, created_at) VALUES (?1, ?2, ?3)",
                        params![id, kind.as_str(), &stored_at],
                    )?;
                }
                for row in &rows {
                    upsert_row(&tx, &generation, row, &stored_at)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
