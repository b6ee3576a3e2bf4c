//! Client and registry configuration.
//!
//! Loaded from YAML, then overridden by `AGENTLINK_*` environment variables.
//! Every field has a default, so an empty document is a valid config.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::PROTOCOL_VERSION;
use crate::errors::A2AError;
use crate::registry::CHANNEL_A2A;

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Options recognized by the A2A client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt transport timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Total attempts per send, the first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: f64,
    /// Ceiling on any single backoff.
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: f64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
    #[serde(default = "default_true")]
    pub enable_tracing: bool,
    /// How long registry resolutions are cached. Zero disables the cache.
    #[serde(default = "default_registry_cache_ttl_seconds")]
    pub registry_cache_ttl_seconds: f64,
    /// Endpoint channel used for invocation, falling back to "http".
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_timeout_seconds() -> f64 { 30.0 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_backoff_seconds() -> f64 { 1.0 }
fn default_max_backoff_seconds() -> f64 { 30.0 }
fn default_true() -> bool { true }
fn default_circuit_breaker_threshold() -> u32 { 5 }
fn default_circuit_breaker_timeout_seconds() -> f64 { 60.0 }
fn default_half_open_max_calls() -> u32 { 1 }
fn default_registry_cache_ttl_seconds() -> f64 { 5.0 }
fn default_channel() -> String { CHANNEL_A2A.to_string() }
fn default_protocol_version() -> String { PROTOCOL_VERSION.to_string() }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            jitter: true,
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_seconds: default_circuit_breaker_timeout_seconds(),
            half_open_max_calls: default_half_open_max_calls(),
            enable_tracing: true,
            registry_cache_ttl_seconds: default_registry_cache_ttl_seconds(),
            channel: default_channel(),
            protocol_version: default_protocol_version(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds, default_timeout_seconds())
    }

    pub fn cache_ttl(&self) -> Duration {
        seconds(self.registry_cache_ttl_seconds, default_registry_cache_ttl_seconds())
    }

    pub fn validate(&self) -> Result<(), A2AError> {
        positive("timeout_seconds", self.timeout_seconds)?;
        positive("circuit_breaker_timeout_seconds", self.circuit_breaker_timeout_seconds)?;
        non_negative("retry_backoff_seconds", self.retry_backoff_seconds)?;
        non_negative("max_backoff_seconds", self.max_backoff_seconds)?;
        non_negative("registry_cache_ttl_seconds", self.registry_cache_ttl_seconds)?;
        if self.max_retries == 0 {
            return Err(A2AError::Config("max_retries must be at least 1".to_string()));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(A2AError::Config(
                "circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(A2AError::Config("half_open_max_calls must be at least 1".to_string()));
        }
        if self.max_backoff_seconds < self.retry_backoff_seconds {
            return Err(A2AError::Config(
                "max_backoff_seconds must not be below retry_backoff_seconds".to_string(),
            ));
        }
        if self.channel.is_empty() {
            return Err(A2AError::Config("channel must not be empty".to_string()));
        }
        if !crate::envelope::SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version.as_str()) {
            return Err(A2AError::Config(format!(
                "unsupported protocol_version '{}'",
                self.protocol_version
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Options for the registry server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_heartbeat_ttl_seconds")]
    pub heartbeat_ttl_seconds: f64,
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: f64,
    #[serde(default = "default_health_check_timeout_seconds")]
    pub health_check_timeout_seconds: f64,
}

fn default_bind() -> String { "0.0.0.0:8500".to_string() }
fn default_heartbeat_ttl_seconds() -> f64 { 30.0 }
fn default_health_check_interval_seconds() -> f64 { 10.0 }
fn default_health_check_timeout_seconds() -> f64 { 2.0 }

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            heartbeat_ttl_seconds: default_heartbeat_ttl_seconds(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
            health_check_timeout_seconds: default_health_check_timeout_seconds(),
        }
    }
}

impl RegistryConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, A2AError> {
        self.bind
            .parse()
            .map_err(|e| A2AError::Config(format!("invalid bind address '{}': {}", self.bind, e)))
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        seconds(self.heartbeat_ttl_seconds, default_heartbeat_ttl_seconds())
    }

    pub fn health_check_interval(&self) -> Duration {
        seconds(self.health_check_interval_seconds, default_health_check_interval_seconds())
    }

    pub fn health_check_timeout(&self) -> Duration {
        seconds(self.health_check_timeout_seconds, default_health_check_timeout_seconds())
    }

    pub fn validate(&self) -> Result<(), A2AError> {
        self.bind_addr()?;
        positive("heartbeat_ttl_seconds", self.heartbeat_ttl_seconds)?;
        positive("health_check_interval_seconds", self.health_check_interval_seconds)?;
        positive("health_check_timeout_seconds", self.health_check_timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, A2AError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| A2AError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, A2AError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| A2AError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), A2AError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `AGENTLINK_*` overrides using `lookup` to read variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), A2AError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let c = &mut self.client;
        override_parsed(&lookup, "AGENTLINK_TIMEOUT_SECONDS", &mut c.timeout_seconds)?;
        override_parsed(&lookup, "AGENTLINK_MAX_RETRIES", &mut c.max_retries)?;
        override_parsed(&lookup, "AGENTLINK_RETRY_BACKOFF_SECONDS", &mut c.retry_backoff_seconds)?;
        override_parsed(&lookup, "AGENTLINK_MAX_BACKOFF_SECONDS", &mut c.max_backoff_seconds)?;
        override_parsed(&lookup, "AGENTLINK_JITTER", &mut c.jitter)?;
        override_parsed(&lookup, "AGENTLINK_CIRCUIT_BREAKER_THRESHOLD", &mut c.circuit_breaker_threshold)?;
        override_parsed(
            &lookup,
            "AGENTLINK_CIRCUIT_BREAKER_TIMEOUT_SECONDS",
            &mut c.circuit_breaker_timeout_seconds,
        )?;
        override_parsed(&lookup, "AGENTLINK_HALF_OPEN_MAX_CALLS", &mut c.half_open_max_calls)?;
        override_parsed(&lookup, "AGENTLINK_ENABLE_TRACING", &mut c.enable_tracing)?;
        override_parsed(
            &lookup,
            "AGENTLINK_REGISTRY_CACHE_TTL_SECONDS",
            &mut c.registry_cache_ttl_seconds,
        )?;
        override_parsed(&lookup, "AGENTLINK_CHANNEL", &mut c.channel)?;

        let r = &mut self.registry;
        override_parsed(&lookup, "AGENTLINK_BIND", &mut r.bind)?;
        override_parsed(&lookup, "AGENTLINK_HEARTBEAT_TTL_SECONDS", &mut r.heartbeat_ttl_seconds)?;
        override_parsed(
            &lookup,
            "AGENTLINK_HEALTH_CHECK_INTERVAL_SECONDS",
            &mut r.health_check_interval_seconds,
        )?;
        override_parsed(
            &lookup,
            "AGENTLINK_HEALTH_CHECK_TIMEOUT_SECONDS",
            &mut r.health_check_timeout_seconds,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), A2AError> {
        self.client.validate()?;
        self.registry.validate()
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), A2AError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| A2AError::Config(format!("invalid {}='{}': {}", key, raw, e)))?;
        log::debug!("Config override from {}", key);
    }
    Ok(())
}

fn positive(name: &str, value: f64) -> Result<(), A2AError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(A2AError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), A2AError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(A2AError::Config(format!("{} must not be negative, got {}", name, value)))
    }
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client.timeout_seconds, 30.0);
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.client.circuit_breaker_threshold, 5);
        assert_eq!(config.client.half_open_max_calls, 1);
        assert!(config.client.enable_tracing);
        assert_eq!(config.client.channel, "a2a");
        assert_eq!(config.registry.bind_addr().unwrap().port(), 8500);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "client:\n  timeout_seconds: 5\n  max_retries: 2\nregistry:\n  heartbeat_ttl_seconds: 12\n",
        )
        .unwrap();
        assert_eq!(config.client.timeout(), Duration::from_secs(5));
        assert_eq!(config.client.max_retries, 2);
        assert_eq!(config.client.retry_backoff_seconds, 1.0);
        assert_eq!(config.registry.heartbeat_ttl(), Duration::from_secs(12));
        assert_eq!(Config::from_yaml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client:\n  enable_tracing: false").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.client.enable_tracing);

        assert!(matches!(
            Config::from_file("/nonexistent/agentlink.yaml"),
            Err(A2AError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AGENTLINK_TIMEOUT_SECONDS", "2.5"),
            ("AGENTLINK_MAX_RETRIES", "7"),
            ("AGENTLINK_ENABLE_TRACING", "false"),
            ("AGENTLINK_BIND", "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.client.timeout(), Duration::from_millis(2500));
        assert_eq!(config.client.max_retries, 7);
        assert!(!config.client.enable_tracing);
        assert_eq!(config.registry.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|k| (k == "AGENTLINK_MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, A2AError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            ClientConfig { timeout_seconds: 0.0, ..ClientConfig::default() },
            ClientConfig { max_retries: 0, ..ClientConfig::default() },
            ClientConfig { circuit_breaker_threshold: 0, ..ClientConfig::default() },
            ClientConfig { half_open_max_calls: 0, ..ClientConfig::default() },
            ClientConfig { retry_backoff_seconds: -1.0, ..ClientConfig::default() },
            ClientConfig { protocol_version: "9.9".into(), ..ClientConfig::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(A2AError::Config(_))), "{:?}", config);
        }

        let registry = RegistryConfig { bind: "not-an-addr".into(), ..RegistryConfig::default() };
        assert!(registry.validate().is_err());
    }
}
