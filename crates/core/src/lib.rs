//! Core of shellcache, a client-side HTTP response cache proxy.
//!
//! This crate provides:
//! - Generation-tagged response store with SQLite backend
//! - Generation lifecycle (install, activate, prune)
//! - Strategy engine (cache-first, network-first, stale-while-revalidate, passthrough)
//! - Background revalidation scheduler
//! - Unified error types and layered configuration
//!
//! The network is reached only through the [`Fetcher`] trait; see
//! `shellcache-client` for the HTTP implementation.

pub mod config;
pub mod error;
pub mod generation;
pub mod identity;
pub mod network;
pub mod proxy;
pub mod request;
pub mod revalidate;
pub mod store;
pub mod strategy;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use generation::{GenerationKind, GenerationManager, GenerationState};
pub use identity::RequestIdentity;
pub use network::Fetcher;
pub use proxy::CacheProxy;
pub use request::{Destination, ProxyRequest, ProxyResponse, RequestMode, ResponseSource};
pub use store::{CacheDb, GenerationRecord};
pub use strategy::{Strategy, StrategyRule};
