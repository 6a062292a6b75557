//! Ordered strategy rules: first match wins.
//!
//! Rules are configuration data. A TOML rule looks like:
//!
//! ```toml
//! [[rules]]
//! name = "api"
//! strategy = "network-first"
//! cache = "dynamic"
//! match = { type = "host_contains", value = "supabase.co" }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use super::Strategy;
use crate::generation::GenerationKind;
use crate::identity::RequestIdentity;
use crate::request::{Destination, ProxyRequest, RequestMode};

/// Predicate over a request's canonical URL, mode and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Matcher {
    /// Matches every request.
    Any,
    /// Host contains the substring (e.g. `supabase.co`).
    HostContains { value: String },
    /// Exact origin, e.g. `https://fonts.gstatic.com`.
    Origin { value: String },
    /// Full URL contains the substring.
    UrlContains { value: String },
    PathPrefix { value: String },
    /// Path equals one of the listed paths.
    PathIn { paths: Vec<String> },
    /// URL is one of the install manifest entries.
    Manifest,
    /// Top-level navigation.
    Navigation,
    Destination { any_of: Vec<Destination> },
    AnyOf { matchers: Vec<Matcher> },
    AllOf { matchers: Vec<Matcher> },
}

impl Matcher {
    pub fn matches(&self, request: &ProxyRequest, url: &Url, manifest: &HashSet<String>) -> bool {
        match self {
            Self::Any => true,
            Self::HostContains { value } => url.host_str().is_some_and(|host| host.contains(value.as_str())),
            Self::Origin { value } => url.origin().ascii_serialization() == value.trim_end_matches('/'),
            Self::UrlContains { value } => url.as_str().contains(value.as_str()),
            Self::PathPrefix { value } => url.path().starts_with(value.as_str()),
            Self::PathIn { paths } => paths.iter().any(|p| p == url.path()),
            Self::Manifest => manifest.contains(url.as_str()),
            Self::Navigation => request.mode == RequestMode::Navigate,
            Self::Destination { any_of } => any_of.contains(&request.destination),
            Self::AnyOf { matchers } => matchers.iter().any(|m| m.matches(request, url, manifest)),
            Self::AllOf { matchers } => matchers.iter().all(|m| m.matches(request, url, manifest)),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of the ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "match")]
    pub matcher: Matcher,

    pub strategy: Strategy,

    /// Generation kind successful responses are written to.
    #[serde(default)]
    pub cache: GenerationKind,

    /// Whether successful network responses are written back at all.
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl StrategyRule {
    pub fn new(matcher: Matcher, strategy: Strategy) -> Self {
        Self { name: None, matcher, strategy, cache: GenerationKind::Static, persist: true }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn into_cache(mut self, cache: GenerationKind) -> Self {
        self.cache = cache;
        self
    }

    pub fn without_persist(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Outcome of classifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    pub cache: GenerationKind,
    pub persist: bool,
    /// Rule name, or `#<index>` for unnamed rules; `None` on fallthrough.
    pub rule: Option<String>,
}

impl Route {
    pub fn passthrough() -> Self {
        Self { strategy: Strategy::Passthrough, cache: GenerationKind::Static, persist: false, rule: None }
    }
}

/// The ordered rule list plus the manifest it may refer to.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<StrategyRule>,
    manifest: HashSet<String>,
}

impl RuleSet {
    pub fn new(rules: Vec<StrategyRule>, manifest: &[RequestIdentity]) -> Self {
        let manifest = manifest.iter().map(|id| id.url().to_string()).collect();
        Self { rules, manifest }
    }

    pub fn rules(&self) -> &[StrategyRule] {
        &self.rules
    }

    /// Evaluate the rules in order against `request` at canonical `url`.
    ///
    /// Falls through to [`Strategy::Passthrough`] when nothing matches.
    pub fn classify(&self, request: &ProxyRequest, url: &Url) -> Route {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matcher.matches(request, url, &self.manifest))
            .map(|(index, rule)| Route {
                strategy: rule.strategy,
                cache: rule.cache,
                persist: rule.persist,
                rule: Some(rule.name.clone().unwrap_or_else(|| format!("#{index}"))),
            })
            .unwrap_or_else(Route::passthrough)
    }
}
