//! SQLite-backed, generation-tagged response store.
//!
//! Every entry belongs to exactly one generation; deleting a generation
//! deletes its entries with it. Access goes through tokio-rusqlite:
//!
//! - `(generation, key_hash)` keyed rows with whole-row overwrite
//! - all-or-nothing manifest seeding in a single transaction
//! - WAL mode so readers never block the background writer
//! - oldest-first trimming when a generation grows past its quota

pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod seed;

pub use connection::CacheDb;
pub use entries::{EntryKey, StoredResponse};
pub use generations::GenerationRecord;
