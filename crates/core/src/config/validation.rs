//! Configuration validation rules.
//!
//! Checks run on an `AppConfig` after it has been loaded from environment,
//! files, or defaults, before any generation is touched.

use crate::config::AppConfig;
use crate::generation::GenerationKind;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `max_entry_bytes` is 0
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - a generation name is empty or both names are equal
    /// - `origin` or a manifest entry is not an http(s) URL
    ///
    /// Returns `ConfigError::Missing` if a rule writes to the dynamic
    /// generation but no dynamic name is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }
        if self.max_entry_bytes == 0 {
            return Err(invalid("max_entry_bytes", "must be greater than 0"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        let generations = &self.generations;
        if generations.static_name.trim().is_empty() {
            return Err(invalid("generations.static_name", "must not be empty"));
        }
        match generations.dynamic_name.as_deref() {
            Some(name) if name.trim().is_empty() => {
                return Err(invalid("generations.dynamic_name", "must not be empty"));
            }
            Some(name) if name == generations.static_name => {
                return Err(invalid("generations.dynamic_name", "must differ from static_name"));
            }
            _ => {}
        }

        if generations.dynamic_name.is_none()
            && let Some(rule) = self.rules.iter().find(|rule| rule.cache == GenerationKind::Dynamic && rule.persist)
        {
            return Err(ConfigError::Missing {
                field: "generations.dynamic_name".into(),
                hint: format!("rule {} writes to the dynamic generation", rule.name.as_deref().unwrap_or("(unnamed)")),
            });
        }

        self.manifest_identities()?;

        if self.max_dynamic_entries == Some(0) {
            tracing::warn!("max_dynamic_entries is 0; dynamic writes will be trimmed immediately");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationsConfig;
    use crate::strategy::{Matcher, Strategy, StrategyRule};

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_max_bytes_exceeds_limit() {
        let config = AppConfig { max_bytes: 51 * 1024 * 1024, ..Default::default() }; // 51MB
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_max_entry_bytes_zero() {
        let config = AppConfig { max_entry_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_entry_bytes"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() }; // 5min 1sec
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { max_bytes: 1, timeout_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());

        let config = AppConfig { max_bytes: 50 * 1024 * 1024, timeout_ms: 300_000, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_generation_names() {
        let config = AppConfig {
            generations: GenerationsConfig { static_name: "  ".into(), dynamic_name: None },
            ..Default::default()
        };
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "generations.static_name")
        );

        let config = AppConfig {
            generations: GenerationsConfig { static_name: "v1".into(), dynamic_name: Some("v1".into()) },
            ..Default::default()
        };
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "generations.dynamic_name")
        );
    }

    #[test]
    fn test_validate_dynamic_rule_needs_dynamic_generation() {
        let rule = StrategyRule::new(Matcher::Any, Strategy::NetworkFirst)
            .named("api")
            .into_cache(GenerationKind::Dynamic);
        let config = AppConfig { rules: vec![rule.clone()], ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));

        let config = AppConfig { rules: vec![rule.clone().without_persist()], ..Default::default() };
        assert!(config.validate().is_ok());

        let config = AppConfig {
            rules: vec![rule],
            generations: GenerationsConfig { static_name: "shell-v1".into(), dynamic_name: Some("data-v1".into()) },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_manifest_entries() {
        let config = AppConfig { manifest: vec!["index.html".into()], ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "manifest"));

        let config = AppConfig { manifest: vec!["ftp://example.com/a".into()], ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "manifest"));

        let config = AppConfig {
            origin: Some("https://example.com/".into()),
            manifest: vec!["index.html".into()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
