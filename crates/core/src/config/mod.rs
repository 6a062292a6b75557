//! Application configuration with layered loading.
//!
//! Configuration is loaded with figment from:
//!
//! 1. Environment variables (SHELLCACHE_*, nested keys split on `__`)
//! 2. TOML config file (if SHELLCACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The manifest, the rule list and the generation names are plain data; a
//! new deployment changes them here, not in code.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

use crate::generation::GenerationKind;
use crate::identity::{RequestIdentity, canonicalize};
use crate::request::Destination;
use crate::strategy::{Matcher, Strategy, StrategyRule, WriteLimits};

/// Names of the generations owned by this deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationsConfig {
    /// App-shell generation, seeded from the manifest.
    #[serde(default = "default_static_name")]
    pub static_name: String,

    /// Runtime data generation, if strategies write to one.
    #[serde(default)]
    pub dynamic_name: Option<String>,
}

impl Default for GenerationsConfig {
    fn default() -> Self {
        Self { static_name: default_static_name(), dynamic_name: None }
    }
}

impl GenerationsConfig {
    pub fn name(&self, kind: GenerationKind) -> Option<&str> {
        match kind {
            GenerationKind::Static => Some(&self.static_name),
            GenerationKind::Dynamic => self.dynamic_name.as_deref(),
        }
    }
}

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite store.
    ///
    /// Set via SHELLCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for network requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Network request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body accepted from the network.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Larger bodies are served but never stored.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,

    /// Trim the dynamic generation to this many entries.
    #[serde(default)]
    pub max_dynamic_entries: Option<usize>,

    /// Base URL that relative manifest entries resolve against.
    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub generations: GenerationsConfig,

    /// App-shell URLs fetched at install, in order.
    #[serde(default)]
    pub manifest: Vec<String>,

    /// Ordered strategy rules; first match wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<StrategyRule>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shellcache.sqlite")
}

fn default_user_agent() -> String {
    "shellcache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_entry_bytes() -> usize {
    2_097_152 // 2MB
}

fn default_static_name() -> String {
    "app-shell-v1".into()
}

/// App shell and navigations revalidate in the background; scripts, styles
/// and fonts are cache-first; everything else passes through.
pub fn default_rules() -> Vec<StrategyRule> {
    vec![
        StrategyRule::new(
            Matcher::AnyOf { matchers: vec![Matcher::Manifest, Matcher::Navigation] },
            Strategy::StaleWhileRevalidate,
        )
        .named("app-shell"),
        StrategyRule::new(
            Matcher::Destination { any_of: vec![Destination::Script, Destination::Style, Destination::Font] },
            Strategy::CacheFirst,
        )
        .named("static-assets"),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
            max_dynamic_entries: None,
            origin: None,
            generations: GenerationsConfig::default(),
            manifest: Vec::new(),
            rules: default_rules(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = std::env::var("SHELLCACHE_CONFIG_FILE").ok();
        Self::load_from(config_file.as_deref())
    }

    /// Same as [`AppConfig::load`] with an explicit config file path.
    pub fn load_from(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_path) = config_file {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(
            Env::prefixed("SHELLCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parsed origin URL, if configured.
    pub fn origin_url(&self) -> Result<Option<Url>, ConfigError> {
        self.origin
            .as_deref()
            .map(|origin| {
                canonicalize(origin, None)
                    .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
            })
            .transpose()
    }

    /// The manifest as canonical GET identities, in configured order.
    pub fn manifest_identities(&self) -> Result<Vec<RequestIdentity>, ConfigError> {
        let origin = self.origin_url()?;
        self.manifest
            .iter()
            .map(|entry| {
                RequestIdentity::parse_get(entry, origin.as_ref()).map_err(|e| ConfigError::Invalid {
                    field: "manifest".into(),
                    reason: format!("{entry}: {e}"),
                })
            })
            .collect()
    }

    pub fn write_limits(&self) -> WriteLimits {
        WriteLimits { max_entry_bytes: self.max_entry_bytes, max_dynamic_entries: self.max_dynamic_entries }
    }
}
