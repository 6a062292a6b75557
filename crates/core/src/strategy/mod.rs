//! Strategy engine: classify a request, then serve it from the store, the
//! network, or both.
//!
//! | Strategy | Serve | Write-back |
//! |---|---|---|
//! | Cache-First | store, else network | on miss |
//! | Network-First | network, store on network failure | on success |
//! | Stale-While-Revalidate | store now, network only on miss | always, in the background |
//! | Passthrough | network | never |
//!
//! Write-backs run on the [`RevalidationScheduler`] and never delay the
//! response. Only GET requests with an exact 200 are ever written.

pub mod rule;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::generation::{GenerationKind, GenerationManager};
use crate::identity::RequestIdentity;
use crate::network::Fetcher;
use crate::request::{ProxyRequest, ProxyResponse};
use crate::revalidate::{RevalidationScheduler, WriteBack};
use crate::store::CacheDb;

pub use rule::{Matcher, Route, RuleSet, StrategyRule};

/// Read/write policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    Passthrough,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CacheFirst => "cache-first",
            Self::NetworkFirst => "network-first",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
            Self::Passthrough => "passthrough",
        };
        f.write_str(name)
    }
}

/// Limits applied to write-backs under storage pressure.
#[derive(Debug, Clone, Copy)]
pub struct WriteLimits {
    /// Bodies larger than this are served but not stored.
    pub max_entry_bytes: usize,
    /// Trim the dynamic generation to this many entries after each write.
    pub max_dynamic_entries: Option<usize>,
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self { max_entry_bytes: 2 * 1024 * 1024, max_dynamic_entries: None }
    }
}

/// Routes requests through the configured strategies.
pub struct StrategyEngine {
    db: CacheDb,
    generations: Arc<GenerationManager>,
    fetcher: Arc<dyn Fetcher>,
    rules: RuleSet,
    scheduler: RevalidationScheduler,
    limits: WriteLimits,
}

impl StrategyEngine {
    pub fn new(
        db: CacheDb, generations: Arc<GenerationManager>, fetcher: Arc<dyn Fetcher>, rules: RuleSet,
        scheduler: RevalidationScheduler,
    ) -> Self {
        Self { db, generations, fetcher, rules, scheduler, limits: WriteLimits::default() }
    }

    pub fn with_limits(mut self, limits: WriteLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Decide how `request` will be served.
    ///
    /// Non-GET requests always pass through, whatever rule they match.
    pub fn route(&self, request: &ProxyRequest, identity: &RequestIdentity) -> Route {
        if !request.is_cacheable_method() {
            return Route::passthrough();
        }
        self.rules.classify(request, identity.url())
    }

    /// Serve one intercepted request.
    pub async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, Error> {
        let identity = match RequestIdentity::new(request.method.clone(), &request.url) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(url = %request.url, "not routable ({e}), passing through");
                return self.passthrough(&request).await;
            }
        };

        let route = self.route(&request, &identity);
        tracing::debug!(
            request = %identity,
            strategy = %route.strategy,
            rule = route.rule.as_deref().unwrap_or("-"),
            "routing request"
        );

        match route.strategy {
            Strategy::CacheFirst => self.cache_first(&request, &identity, &route).await,
            Strategy::NetworkFirst => self.network_first(&request, &identity, &route).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request, &identity, &route).await,
            Strategy::Passthrough => self.passthrough(&request).await,
        }
    }

    async fn cache_first(
        &self, request: &ProxyRequest, identity: &RequestIdentity, route: &Route,
    ) -> Result<ProxyResponse, Error> {
        if let Some(cached) = self.lookup(identity).await {
            tracing::debug!(request = %identity, "cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        self.write_back(identity, route, &response).await;
        Ok(response)
    }

    async fn network_first(
        &self, request: &ProxyRequest, identity: &RequestIdentity, route: &Route,
    ) -> Result<ProxyResponse, Error> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.write_back(identity, route, &response).await;
                Ok(response)
            }
            Err(e) if e.is_network() => match self.lookup(identity).await {
                Some(cached) => {
                    tracing::debug!(request = %identity, "network failed ({e}), serving cached response");
                    Ok(cached)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn stale_while_revalidate(
        &self, request: &ProxyRequest, identity: &RequestIdentity, route: &Route,
    ) -> Result<ProxyResponse, Error> {
        let Some(cached) = self.lookup(identity).await else {
            let response = self.fetcher.fetch(request).await?;
            self.write_back(identity, route, &response).await;
            return Ok(response);
        };

        tracing::debug!(request = %identity, "serving stale response, revalidating");
        let write = self.prepare_write(identity, route).await;
        let fetcher = Arc::clone(&self.fetcher);
        let request = request.clone();
        let max_entry_bytes = self.limits.max_entry_bytes;

        self.scheduler
            .spawn("revalidate", identity.to_string(), revalidate(fetcher, request, write, max_entry_bytes));

        Ok(cached)
    }

    async fn passthrough(&self, request: &ProxyRequest) -> Result<ProxyResponse, Error> {
        self.fetcher.fetch(request).await
    }

    /// Read from the current generations. Storage failures read as a miss.
    async fn lookup(&self, identity: &RequestIdentity) -> Option<ProxyResponse> {
        let generations = self.generations.current_ids().await;
        if generations.is_empty() {
            return None;
        }
        match self.db.get_in(&generations, identity).await {
            Ok(stored) => stored.map(|s| s.into_response()),
            Err(e) => {
                tracing::warn!(request = %identity, "store read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// Resolve the write target at dispatch time, or `None` if nothing should be written.
    async fn prepare_write(&self, identity: &RequestIdentity, route: &Route) -> Option<WriteBack> {
        if !route.persist || *identity.method() != http::Method::GET {
            return None;
        }
        let Some(generation) = self.generations.current_id(route.cache).await else {
            tracing::debug!(request = %identity, cache = %route.cache, "no current generation, skipping write-back");
            return None;
        };
        let max_entries = match route.cache {
            GenerationKind::Dynamic => self.limits.max_dynamic_entries,
            GenerationKind::Static => None,
        };
        Some(WriteBack::new(self.db.clone(), generation, identity.clone(), max_entries))
    }

    async fn write_back(&self, identity: &RequestIdentity, route: &Route, response: &ProxyResponse) {
        if !storable(response, self.limits.max_entry_bytes) {
            return;
        }
        if let Some(write) = self.prepare_write(identity, route).await {
            let response = response.clone();
            self.scheduler.spawn("write-back", identity.to_string(), write.run(response));
        }
    }
}

/// Refresh half of stale-while-revalidate.
async fn revalidate(
    fetcher: Arc<dyn Fetcher>, request: ProxyRequest, write: Option<WriteBack>, max_entry_bytes: usize,
) -> Result<(), Error> {
    let response = fetcher.fetch(&request).await?;
    match write {
        Some(write) if storable(&response, max_entry_bytes) => write.run(response).await,
        _ => Ok(()),
    }
}

fn storable(response: &ProxyResponse, max_entry_bytes: usize) -> bool {
    if !response.is_storable() {
        return false;
    }
    if response.body.len() > max_entry_bytes {
        tracing::debug!(bytes = response.body.len(), max_entry_bytes, "response too large to store");
        return false;
    }
    true
}
