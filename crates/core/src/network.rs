//! The network collaborator.
//!
//! The proxy never talks HTTP itself; it hands requests to a [`Fetcher`].
//! `shellcache-client` provides the reqwest-backed implementation.

use crate::Error;
use crate::request::{ProxyRequest, ProxyResponse};

/// Sends a request over the network.
///
/// Implementations return any HTTP status as a response; only transport
/// failures (connect, timeout, oversized body) are errors.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, Error>;
}
