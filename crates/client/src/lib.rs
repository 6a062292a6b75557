//! Network client for shellcache.
//!
//! This crate provides the reqwest-backed [`shellcache_core::Fetcher`] used
//! by the CLI host.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig};
