//! Configuration types for the sift proxy.

use crate::codec::DEFAULT_MAX_INFLATED_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default Datadog intake the proxy forwards to.
pub const DEFAULT_ORIGIN: &str = "https://app.datadoghq.com";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

/// Main configuration for the sift proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Port to listen on
    pub port: u16,
    /// Upstream origin every request is forwarded to
    pub origin: String,
    /// Maximum body size that will be buffered and rewritten (bytes)
    pub max_body_size: usize,
    /// Maximum size a series body may inflate to before it is forwarded as is (bytes)
    pub max_inflated_size: usize,
    /// Override the host of every metric, regardless of per-metric rules
    pub remove_all_host: bool,
    /// Per-metric rules (evaluated in declaration order)
    pub metrics: Vec<MetricRule>,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            origin: DEFAULT_ORIGIN.to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
            max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
            remove_all_host: false,
            metrics: vec![],
        }
    }
}

/// A rule applied to every metric whose name equals `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    /// Exact metric name
    pub name: String,
    /// Drop the whole series
    #[serde(default)]
    pub remove_metric: bool,
    /// Tags to strip from the series
    #[serde(default)]
    pub remove_tags: Vec<String>,
    /// Replace the reporting host
    #[serde(default)]
    pub remove_host: bool,
}

impl SiftConfig {
    /// Parse a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SiftConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SiftConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. `.yaml`/`.yml` files are read as YAML,
    /// anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inflated_size == 0 {
            return Err(ConfigError::ZeroInflatedSize);
        }

        if let Some(index) = self.metrics.iter().position(|m| m.name.is_empty()) {
            return Err(ConfigError::EmptyRuleName { index });
        }

        let origin = url::Url::parse(&self.origin).map_err(|e| ConfigError::InvalidOrigin {
            origin: self.origin.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(origin.scheme(), "http" | "https") || !origin.has_host() {
            return Err(ConfigError::InvalidOrigin {
                origin: self.origin.clone(),
                reason: "expected an absolute http(s) URL".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration errors. Any of these stops the process before it serves.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metric rule #{index} has an empty name")]
    EmptyRuleName { index: usize },

    #[error("max_inflated_size must be greater than zero")]
    ZeroInflatedSize,

    #[error("invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
}
