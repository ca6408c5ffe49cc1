//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TABSYNC_*)
//! 2. TOML config file (if TABSYNC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::cache::TabKey;

mod validation;

pub use validation::ConfigError;

/// Placeholder replaced by the document id in `origin_url`.
pub const DOCUMENT_PLACEHOLDER: &str = "{document}";

/// Placeholder replaced by the tab id in `origin_url`.
pub const TAB_PLACEHOLDER: &str = "{tab}";

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// URL template for one tab's delimited export.
    ///
    /// Must contain `{document}` and `{tab}`.
    /// Set via TABSYNC_ORIGIN_URL environment variable.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// User-Agent string for origin requests.
    ///
    /// Set via TABSYNC_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound on a single retrieval, in milliseconds.
    ///
    /// Set via TABSYNC_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between scheduled refreshes, in milliseconds.
    ///
    /// Set via TABSYNC_POLL_INTERVAL_MS environment variable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Tabs to mirror, as `document:tab` references.
    ///
    /// Set via TABSYNC_SOURCES environment variable, either comma separated
    /// (`doc:0,doc:1`) or as an array (`[doc:0, doc:1]`).
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<String>,
}

/// `sources` as written in a TOML array or a single environment string.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceList {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_sources<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let sources = match SourceList::deserialize(deserializer)? {
        SourceList::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        SourceList::List(list) => list,
    };
    Ok(sources.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

fn default_origin_url() -> String {
    "https://docs.google.com/spreadsheets/d/{document}/export?format=csv&gid={tab}".into()
}

fn default_user_agent() -> String {
    "tabsync/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin_url: default_origin_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TABSYNC_`
    /// 2. TOML file from `TABSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TABSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TABSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parsed `sources`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` on the first malformed reference.
    pub fn source_keys(&self) -> Result<Vec<TabKey>, ConfigError> {
        self.sources
            .iter()
            .map(|source| {
                TabKey::parse(source).map_err(|e| ConfigError::Invalid { field: "sources".into(), reason: e.to_string() })
            })
            .collect()
    }

    /// Sources for commands that need at least one.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when no source is configured.
    pub fn require_sources(&self) -> Result<Vec<TabKey>, ConfigError> {
        let keys = self.source_keys()?;
        if keys.is_empty() {
            return Err(ConfigError::Missing {
                field: "sources".into(),
                hint: "Pass document:tab arguments or set TABSYNC_SOURCES=doc:tab[,doc:tab...]".into(),
            });
        }
        Ok(keys)
    }
}
