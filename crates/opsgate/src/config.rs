//! Gateway configuration

use anyhow::{bail, Context, Result};
use opsgate_lib::gateway::PrometheusConfig;
use opsgate_lib::RetryPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::ApiKeys;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Metrics backend base URL
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Wall-clock bound for one mutation, retries included, and for status and inventory reads
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout_secs: u64,

    /// HTTP timeout for one metrics query
    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Inline keys, comma separated in the environment
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// JSON object of `{ "<key>": true|false }`
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "opsgate".to_string())
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_mutation_timeout() -> u64 {
    30
}

fn default_metrics_timeout() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    1000
}

impl GatewayConfig {
    /// Load from an optional `opsgate.{toml,yaml,json}` file, then `OPSGATE_*` variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("opsgate").required(false))
            .add_source(
                config::Environment::with_prefix("OPSGATE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api_keys"),
            )
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("Invalid gateway configuration")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            deadline: Duration::from_secs(self.mutation_timeout_secs),
        }
    }

    pub fn prometheus_config(&self) -> PrometheusConfig {
        PrometheusConfig {
            base_url: self.prometheus_url.clone(),
            timeout: Duration::from_secs(self.metrics_timeout_secs),
        }
    }

    /// Inline keys plus the enabled entries of the key file; at least one required
    pub fn api_keys(&self) -> Result<ApiKeys> {
        let mut keys = self.api_keys.clone();
        if let Some(path) = &self.api_keys_file {
            keys.extend(read_key_file(path)?);
        }

        let keys = ApiKeys::new(keys);
        if keys.is_empty() {
            bail!("No API key configured; set OPSGATE_API_KEYS or OPSGATE_API_KEYS_FILE");
        }
        Ok(keys)
    }
}

fn read_key_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read API key file {}", path.display()))?;
    let entries: HashMap<String, bool> = serde_json::from_str(&raw)
        .with_context(|| format!("API key file {} is not a JSON object of booleans", path.display()))?;
    Ok(entries
        .into_iter()
        .filter_map(|(key, enabled)| enabled.then_some(key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn config_with(overrides: &[(&str, &str)]) -> GatewayConfig {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        GatewayConfig::from_config(builder.build().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.listen_addr(), "0.0.0.0:8000");
        assert_eq!(config.prometheus_url, "http://localhost:9090");

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
        assert_eq!(policy.deadline, Duration::from_secs(30));
        assert_eq!(config.prometheus_config().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_keys_fail() {
        let config = config_with(&[]);
        assert_err!(config.api_keys());

        let config = GatewayConfig::from_config(
            config::Config::builder()
                .set_override("api_keys", vec!["k1", "k2"])
                .unwrap()
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(assert_ok!(config.api_keys()).len(), 2);
    }

    #[test]
    fn test_key_file_disabled_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"live-key": true, "revoked-key": false}}"#).unwrap();

        let config = config_with(&[("api_keys_file", file.path().to_str().unwrap())]);
        let keys = config.api_keys().unwrap();

        assert_eq!(keys.len(), 1);
        assert!(keys.authorize(Some("Bearer live-key")));
        assert!(!keys.authorize(Some("Bearer revoked-key")));
    }

    #[test]
    fn test_unreadable_key_file() {
        let config = config_with(&[("api_keys_file", "/nonexistent/keys.json")]);
        assert_err!(config.api_keys());
    }
}
