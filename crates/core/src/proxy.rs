//! Lifecycle hooks the hosting runtime calls.
//!
//! A host drives one [`CacheProxy`] through three events: `on_install` when a
//! new deployment arrives, `on_activate` once it takes control, and
//! `on_request` for every intercepted request.

use std::sync::Arc;

use crate::Error;
use crate::config::{AppConfig, ConfigError};
use crate::generation::{GenerationKind, GenerationManager};
use crate::identity::RequestIdentity;
use crate::network::Fetcher;
use crate::request::{ProxyRequest, ProxyResponse};
use crate::revalidate::RevalidationScheduler;
use crate::store::CacheDb;
use crate::strategy::{RuleSet, StrategyEngine, StrategyRule, WriteLimits};

pub struct CacheProxy {
    db: CacheDb,
    generations: Arc<GenerationManager>,
    fetcher: Arc<dyn Fetcher>,
    manifest: Vec<RequestIdentity>,
    engine: StrategyEngine,
    scheduler: RevalidationScheduler,
}

impl CacheProxy {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, generations: GenerationManager, manifest: Vec<RequestIdentity>,
        rules: Vec<StrategyRule>,
    ) -> Self {
        let generations = Arc::new(generations);
        let scheduler = RevalidationScheduler::new();
        let engine = StrategyEngine::new(
            db.clone(),
            Arc::clone(&generations),
            Arc::clone(&fetcher),
            RuleSet::new(rules, &manifest),
            scheduler.clone(),
        );
        Self { db, generations, fetcher, manifest, engine, scheduler }
    }

    /// Build a proxy from loaded configuration.
    pub fn from_config(config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        let manifest = config.manifest_identities()?;
        let generations = GenerationManager::from_config(db.clone(), &config.generations);
        Ok(Self::new(db, fetcher, generations, manifest, config.rules.clone()).with_limits(config.write_limits()))
    }

    pub fn with_limits(self, limits: WriteLimits) -> Self {
        Self { engine: self.engine.with_limits(limits), ..self }
    }

    /// Seed the static generation from the manifest and register the dynamic one.
    ///
    /// Fails with [`Error::SeedFailed`] if any manifest URL cannot be fetched
    /// with a 2xx status; no generation becomes current in that case.
    pub async fn on_install(&self) -> Result<(), Error> {
        tracing::info!(entries = self.manifest.len(), "install");
        self.generations.install(&self.manifest, self.fetcher.as_ref()).await
    }

    /// Delete every stored generation that is not current.
    ///
    /// Returns the ids that were removed.
    pub async fn on_activate(&self) -> Result<Vec<String>, Error> {
        let destroyed = self.generations.activate().await?;
        tracing::info!(removed = destroyed.len(), "activate");
        Ok(destroyed)
    }

    /// Serve one intercepted request through the matching strategy.
    pub async fn on_request(&self, request: ProxyRequest) -> Result<ProxyResponse, Error> {
        self.engine.handle(request).await
    }

    /// Pick up generations installed by an earlier process.
    pub async fn resume(&self) -> Result<Vec<GenerationKind>, Error> {
        self.generations.resume().await
    }

    /// Wait for pending revalidations and write-backs.
    pub async fn drain(&self) {
        self.scheduler.drain().await
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn generations(&self) -> &GenerationManager {
        &self.generations
    }

    pub fn manifest(&self) -> &[RequestIdentity] {
        &self.manifest
    }
}

impl std::fmt::Debug for CacheProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProxy")
            .field("generations", &self.generations)
            .field("manifest", &self.manifest.len())
            .field("rules", &self.engine.rules().rules().len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use url::Url;

    use super::*;
    use crate::config::GenerationsConfig;
    use crate::generation::GenerationState;
    use crate::network::stub::StubFetcher;
    use crate::request::Destination;
    use crate::strategy::{Matcher, Strategy};

    const ORIGIN: &str = "https://app.example.com/";
    const INDEX: &str = "https://app.example.com/";
    const MUSIC: &str = "https://app.example.com/music.html";
    const CHART: &str = "https://cdn.example.com/chart.js";
    const DATA: &str = "https://api.example.com/data";

    fn config(manifest: &[&str]) -> AppConfig {
        AppConfig {
            origin: Some(ORIGIN.into()),
            manifest: manifest.iter().map(|s| s.to_string()).collect(),
            generations: GenerationsConfig { static_name: "shell-v2".into(), dynamic_name: Some("data-v2".into()) },
            rules: vec![
                StrategyRule::new(Matcher::HostContains { value: "api.".into() }, Strategy::StaleWhileRevalidate)
                    .named("api")
                    .into_cache(GenerationKind::Dynamic),
                StrategyRule::new(Matcher::Manifest, Strategy::CacheFirst).named("shell"),
                StrategyRule::new(Matcher::Destination { any_of: vec![Destination::Image] }, Strategy::NetworkFirst)
                    .into_cache(GenerationKind::Dynamic),
            ],
            ..Default::default()
        }
    }

    fn shell_fetcher() -> StubFetcher {
        StubFetcher::new()
            .respond(INDEX, 200, "<html>index</html>")
            .respond(MUSIC, 200, "<html>music</html>")
            .respond(CHART, 200, "chart()")
    }

    async fn proxy(config: &AppConfig, fetcher: Arc<StubFetcher>) -> CacheProxy {
        let db = CacheDb::open_in_memory().await.unwrap();
        CacheProxy::from_config(config, db, fetcher).unwrap()
    }

    fn get(url: &str) -> ProxyRequest {
        ProxyRequest::get(Url::parse(url).unwrap())
    }

    fn identity(url: &str) -> RequestIdentity {
        RequestIdentity::parse_get(url, None).unwrap()
    }

    #[tokio::test]
    async fn test_install_seeds_manifest() {
        let fetcher = Arc::new(shell_fetcher());
        let proxy = proxy(&config(&["./", "music.html", CHART]), fetcher.clone()).await;

        proxy.on_install().await.unwrap();

        assert_eq!(proxy.db().count_entries("shell-v2").await.unwrap(), 3);
        assert_eq!(proxy.generations().state(GenerationKind::Static).await, GenerationState::Current);
        assert_eq!(proxy.generations().state(GenerationKind::Dynamic).await, GenerationState::Current);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_install_with_missing_asset_fails_cleanly() {
        let fetcher = Arc::new(StubFetcher::new().respond(INDEX, 200, "ok").respond(MUSIC, 404, "missing"));
        let proxy = proxy(&config(&["./", "music.html"]), fetcher).await;

        let result = proxy.on_install().await;

        assert!(matches!(result, Err(Error::SeedFailed { .. })));
        assert!(proxy.generations().current_ids().await.is_empty());
        assert_eq!(proxy.db().count_entries("shell-v2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_install_twice_leaves_entries_unchanged() {
        let proxy = proxy(&config(&["./", "music.html"]), Arc::new(shell_fetcher())).await;

        proxy.on_install().await.unwrap();
        let before = proxy.db().keys("shell-v2").await.unwrap();
        proxy.on_install().await.unwrap();
        let after = proxy.db().keys("shell-v2").await.unwrap();

        assert_eq!(before, after);
        let index = proxy.db().get(&identity(INDEX)).await.unwrap().unwrap();
        assert_eq!(index.body, Bytes::from_static(b"<html>index</html>"));
    }

    #[tokio::test]
    async fn test_activate_leaves_only_current_generations() {
        let proxy = proxy(&config(&["./"]), Arc::new(shell_fetcher())).await;
        let old = ProxyResponse::from_network(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"old"));
        proxy.db().register_generation("shell-v1", GenerationKind::Static).await.unwrap();
        proxy.db().put("shell-v1", &identity(INDEX), &old).await.unwrap();
        proxy.db().register_generation("data-v1", GenerationKind::Dynamic).await.unwrap();

        proxy.on_install().await.unwrap();
        let removed = proxy.on_activate().await.unwrap();

        let ids = proxy.db().list_generation_ids().await.unwrap();
        let current: BTreeSet<String> = proxy.generations().current_ids().await.into_iter().collect();
        assert_eq!(ids, current);
        assert_eq!(ids, BTreeSet::from(["data-v2".to_string(), "shell-v2".to_string()]));
        assert_eq!(removed.len(), 2);
        assert_eq!(proxy.db().count_entries("shell-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let proxy = proxy(&config(&["./"]), Arc::new(shell_fetcher())).await;

        assert!(matches!(proxy.on_activate().await, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_manifest_entry_served_from_cache_offline() {
        let fetcher = Arc::new(shell_fetcher());
        let proxy = proxy(&config(&["./", "music.html"]), fetcher.clone()).await;
        proxy.on_install().await.unwrap();
        fetcher.set(MUSIC, 500, "down");

        let response = proxy.on_request(get(MUSIC)).await.unwrap();

        assert!(response.is_from_cache());
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"<html>music</html>"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_first_matching_rule_decides() {
        let fetcher = Arc::new(shell_fetcher().respond("https://api.example.com/logo.png", 200, "png"));
        let proxy = proxy(&config(&["./"]), fetcher.clone()).await;
        proxy.on_install().await.unwrap();

        // Matches "api" before the image rule, so it is stale-while-revalidate.
        let image = get("https://api.example.com/logo.png").with_destination(Destination::Image);
        proxy.on_request(image.clone()).await.unwrap();
        proxy.drain().await;
        fetcher.set("https://api.example.com/logo.png", 200, "png-2");

        let response = proxy.on_request(image).await.unwrap();
        proxy.drain().await;

        assert!(response.is_from_cache());
        assert_eq!(response.body, Bytes::from_static(b"png"));
    }

    #[tokio::test]
    async fn test_swr_returns_old_then_stores_new() {
        let fetcher = Arc::new(shell_fetcher().respond(DATA, 200, "old").with_delay(Duration::from_millis(10)));
        let proxy = proxy(&config(&["./"]), fetcher.clone()).await;
        proxy.on_install().await.unwrap();
        proxy.on_request(get(DATA)).await.unwrap();
        proxy.drain().await;

        fetcher.set(DATA, 200, "new");
        let response = proxy.on_request(get(DATA)).await.unwrap();

        assert_eq!(response.body, Bytes::from_static(b"old"));
        proxy.drain().await;
        let stored = proxy.db().get(&identity(DATA)).await.unwrap().unwrap();
        assert_eq!(stored.generation, "data-v2");
        assert_eq!(stored.body, Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_swr_with_failing_network_returns_stored() {
        let fetcher = Arc::new(shell_fetcher().respond(DATA, 200, "old"));
        let proxy = proxy(&config(&["./"]), fetcher.clone()).await;
        proxy.on_install().await.unwrap();
        proxy.on_request(get(DATA)).await.unwrap();
        proxy.drain().await;

        let offline = Arc::new(StubFetcher::new());
        let restarted = CacheProxy::from_config(&config(&["./"]), proxy.db().clone(), offline).unwrap();
        restarted.resume().await.unwrap();
        let response = restarted.on_request(get(DATA)).await.unwrap();
        restarted.drain().await;

        assert!(response.is_from_cache());
        assert_eq!(response.body, Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn test_network_first_miss_with_failing_network_propagates() {
        let proxy = proxy(&config(&["./"]), Arc::new(shell_fetcher())).await;
        proxy.on_install().await.unwrap();

        let image = get("https://images.example.com/missing.png").with_destination(Destination::Image);
        let result = proxy.on_request(image).await;

        assert!(matches!(result, Err(e) if e.is_network()));
    }

    #[tokio::test]
    async fn test_non_get_never_stored() {
        let fetcher = Arc::new(shell_fetcher().respond(DATA, 200, "saved"));
        let proxy = proxy(&config(&["./"]), fetcher).await;
        proxy.on_install().await.unwrap();

        let post = ProxyRequest::new(Method::POST, Url::parse(DATA).unwrap());
        let response = proxy.on_request(post).await.unwrap();
        proxy.drain().await;

        assert_eq!(response.body, Bytes::from_static(b"saved"));
        assert_eq!(proxy.db().count_entries("data-v2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_request_passes_through() {
        let fetcher = Arc::new(shell_fetcher().respond("https://example.org/page", 200, "page"));
        let proxy = proxy(&config(&["./"]), fetcher).await;
        proxy.on_install().await.unwrap();

        let response = proxy.on_request(get("https://example.org/page")).await.unwrap();
        proxy.drain().await;

        assert!(!response.is_from_cache());
        assert!(proxy.db().get(&identity("https://example.org/page")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_after_restart() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = CacheProxy::from_config(&config(&["./"]), db.clone(), Arc::new(shell_fetcher())).unwrap();
        first.on_install().await.unwrap();

        let second = CacheProxy::from_config(&config(&["./"]), db, Arc::new(StubFetcher::new())).unwrap();
        assert!(second.generations().current_ids().await.is_empty());

        let resumed = second.resume().await.unwrap();

        assert_eq!(resumed, vec![GenerationKind::Static, GenerationKind::Dynamic]);
        let response = second.on_request(get(INDEX)).await.unwrap();
        assert!(response.is_from_cache());
    }
}
