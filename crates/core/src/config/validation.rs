//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, DOCUMENT_PLACEHOLDER, TAB_PLACEHOLDER};
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

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `poll_interval_ms` is less than 1s or exceeds 1 hour
    /// - `user_agent` is empty
    /// - `origin_url` is not an http(s) URL with both placeholders
    /// - any entry of `sources` is not a valid `document:tab` reference
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.poll_interval_ms < 1_000 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms".into(),
                reason: "must be at least 1000ms".into(),
            });
        }
        if self.poll_interval_ms > 3_600_000 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms".into(),
                reason: "must not exceed 1 hour (3600000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        self.validate_origin_url()?;
        self.source_keys()?;

        if self.timeout_ms > self.poll_interval_ms {
            tracing::warn!(
                timeout_ms = self.timeout_ms,
                poll_interval_ms = self.poll_interval_ms,
                "timeout_ms exceeds poll_interval_ms; \
                 a slow retrieval will delay the next refresh"
            );
        }

        Ok(())
    }

    fn validate_origin_url(&self) -> Result<(), ConfigError> {
        for placeholder in [DOCUMENT_PLACEHOLDER, TAB_PLACEHOLDER] {
            if !self.origin_url.contains(placeholder) {
                return Err(ConfigError::Invalid {
                    field: "origin_url".into(),
                    reason: format!("must contain {placeholder}"),
                });
            }
        }

        let sample = self.origin_url.replace(DOCUMENT_PLACEHOLDER, "document").replace(TAB_PLACEHOLDER, "0");
        let parsed =
            url::Url::parse(&sample).map_err(|e| ConfigError::Invalid { field: "origin_url".into(), reason: e.to_string() })?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ConfigError::Invalid {
                field: "origin_url".into(),
                reason: format!("unsupported scheme: {scheme}"),
            }),
        }
    }
}
