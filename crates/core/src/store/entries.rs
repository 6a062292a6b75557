//! Stored response CRUD operations.
//!
//! Entries are keyed by `(generation, key_hash)`; a write replaces the whole
//! row, so a stored response is never observed half-updated.

use super::connection::CacheDb;
use crate::identity::RequestIdentity;
use crate::request::{ProxyResponse, ResponseSource};
use crate::Error;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// An immutable snapshot of a response owned by the store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub generation: String,
    pub method: String,
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: String,
}

impl StoredResponse {
    /// Hand the stored snapshot back to the host as a cache-sourced response.
    pub fn into_response(self) -> ProxyResponse {
        ProxyResponse { status: self.status, headers: self.headers, body: self.body, source: ResponseSource::Cache }
    }
}

/// The stored identity of an entry, as listed by [`CacheDb::keys`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryKey {
    pub method: String,
    pub url: String,
}

/// Encode headers as a JSON list of `[name, value]` pairs.
///
/// Values that are not valid UTF-8 are stored lossily.
pub(crate) fn headers_to_json(headers: &HeaderMap) -> Result<String, Error> {
    let pairs: Vec<(&str, String)> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

pub(crate) fn headers_from_json(json: &str) -> Result<HeaderMap, Error> {
    let pairs: Vec<(String, String)> = serde_json::from_str(json)?;
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        let value = HeaderValue::from_str(&value).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Row shape used to move an entry across the connection thread boundary.
pub(crate) struct EntryRow {
    pub key_hash: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers_json: String,
    pub body: Vec<u8>,
}

impl EntryRow {
    pub(crate) fn new(identity: &RequestIdentity, response: &ProxyResponse) -> Result<Self, Error> {
        Ok(Self {
            key_hash: identity.cache_key(),
            method: identity.method().to_string(),
            url: identity.url().to_string(),
            status: response.status.as_u16(),
            headers_json: headers_to_json(&response.headers)?,
            body: response.body.to_vec(),
        })
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn upsert_row(
    conn: &rusqlite::Connection, generation: &str, row: &EntryRow, stored_at: &str,
) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO entries (generation, key_hash, method, url, status, headers_json, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(generation, key_hash) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![generation, &row.key_hash, &row.method, &row.url, row.status, &row.headers_json, &row.body, stored_at],
    )?;
    Ok(())
}

type RawEntry = (String, String, String, u16, String, Vec<u8>, String);

fn decode(raw: RawEntry) -> Result<StoredResponse, Error> {
    let (generation, method, url, status, headers_json, body, stored_at) = raw;
    Ok(StoredResponse {
        generation,
        method,
        url,
        status: StatusCode::from_u16(status).map_err(|e| Error::CorruptEntry(e.to_string()))?,
        headers: headers_from_json(&headers_json)?,
        body: Bytes::from(body),
        stored_at,
    })
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
}

impl CacheDb {
    /// Insert or overwrite the entry for `identity` in `generation`.
    ///
    /// The generation must already be registered.
    pub async fn put(
        &self, generation: &str, identity: &RequestIdentity, response: &ProxyResponse,
    ) -> Result<(), Error> {
        let generation = generation.to_string();
        let row = EntryRow::new(identity, response)?;
        self.conn
            .call(move |conn| -> Result<(), Error> { upsert_row(conn, &generation, &row, &now_timestamp()) })
            .await
            .map_err(Error::from)
    }

    /// Look up `identity` across every generation, oldest generation first.
    pub async fn get(&self, identity: &RequestIdentity) -> Result<Option<StoredResponse>, Error> {
        let key_hash = identity.cache_key();
        self.conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let result = conn.query_row(
                    "SELECT e.generation, e.method, e.url, e.status, e.headers_json, e.body, e.stored_at
                     FROM entries e JOIN generations g ON g.id = e.generation
                     WHERE e.key_hash = ?1
                     ORDER BY g.rowid ASC
                     LIMIT 1",
                    params![key_hash],
                    read_raw,
                );

                match result {
                    Ok(raw) => decode(raw).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Look up `identity` in the given generations, in order.
    pub async fn get_in(
        &self, generations: &[String], identity: &RequestIdentity,
    ) -> Result<Option<StoredResponse>, Error> {
        let generations = generations.to_vec();
        let key_hash = identity.cache_key();
        self.conn
            .call(move |conn| -> Result<Option<StoredResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT generation, method, url, status, headers_json, body, stored_at
                     FROM entries WHERE generation = ?1 AND key_hash = ?2",
                )?;
                for generation in &generations {
                    match stmt.query_row(params![generation, &key_hash], read_raw) {
                        Ok(raw) => return decode(raw).map(Some),
                        Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(None)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one entry. Returns whether a row was removed.
    pub async fn delete(&self, generation: &str, identity: &RequestIdentity) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key_hash = identity.cache_key();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash = ?2",
                    params![generation, key_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Enumerate the identities stored in a generation, oldest first.
    pub async fn keys(&self, generation: &str) -> Result<Vec<EntryKey>, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntryKey>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url FROM entries WHERE generation = ?1 ORDER BY stored_at ASC, rowid ASC",
                )?;
                let keys = stmt
                    .query_map(params![generation], |row| Ok(EntryKey { method: row.get(0)?, url: row.get(1)? }))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries stored in a generation.
    pub async fn count_entries(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![generation], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Drop the oldest entries of a generation until count <= max_entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_generation(&self, generation: &str, max_entries: usize) -> Result<u64, Error> {
        let generation = generation.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![&generation], |row| {
                        row.get(0)
                    })?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM entries WHERE rowid IN (
                        SELECT rowid FROM entries WHERE generation = ?1
                        ORDER BY stored_at ASC, rowid ASC LIMIT ?2
                    )",
                    params![&generation, to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
