//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Disk cache settings.
    pub cache: CacheConfig,

    /// Response body censoring settings.
    pub censor: CensorConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Buffer sizes and limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
        }
    }
}

impl ListenerConfig {
    /// Replace the port of `bind_address`, keeping the host part.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.bind_address.clone(),
        };
        self.bind_address = format!("{}:{}", host, port);
    }
}

/// Disk cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and populate the disk cache.
    pub enabled: bool,

    /// Directory holding one file per cached URI.
    pub directory: PathBuf,

    /// Request methods whose responses are looked up and stored.
    pub methods: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from(".proxy-cache"),
            methods: vec!["GET".to_string()],
        }
    }
}

impl CacheConfig {
    /// Whether responses to `method` go through the cache.
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.enabled && self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Censoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CensorConfig {
    /// Redact blocklisted words in text response bodies.
    pub enabled: bool,

    /// Blocklist file, one word per line.
    pub blocklist_path: PathBuf,
}

impl Default for CensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            blocklist_path: PathBuf::from("censor.txt"),
        }
    }
}

/// Timeout configuration. A value of 0 disables the timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Maximum wait for a single read from the client or origin, in seconds.
    pub read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        (self.connect_secs > 0).then(|| Duration::from_secs(self.connect_secs))
    }

    pub fn read(&self) -> Option<Duration> {
        (self.read_secs > 0).then(|| Duration::from_secs(self.read_secs))
    }
}

/// Buffer sizes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Size of the single read a client request must fit into.
    pub request_buffer_bytes: usize,

    /// Read size when streaming responses.
    pub chunk_bytes: usize,

    /// Response header bytes buffered while looking for the header terminator.
    pub max_header_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_buffer_bytes: 8192,
            chunk_bytes: 8192,
            max_header_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(!config.cache.enabled);
        assert!(!config.censor.enabled);
        assert_eq!(config.cache.directory, PathBuf::from(".proxy-cache"));
        assert_eq!(config.limits.request_buffer_bytes, 8192);
        assert_eq!(config.timeouts.connect(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_timeout_disables() {
        let timeouts = TimeoutConfig { connect_secs: 0, read_secs: 0 };
        assert!(timeouts.connect().is_none());
        assert!(timeouts.read().is_none());
    }

    #[test]
    fn cacheable_requires_enabled_cache() {
        let mut cache = CacheConfig::default();
        assert!(!cache.is_cacheable("GET"));
        cache.enabled = true;
        assert!(cache.is_cacheable("get"));
        assert!(!cache.is_cacheable("POST"));
    }

    #[test]
    fn set_port_keeps_host() {
        let mut listener = ListenerConfig::default();
        listener.set_port(3128);
        assert_eq!(listener.bind_address, "0.0.0.0:3128");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [cache]
            enabled = true
            directory = "/tmp/proxy-cache"
            "#,
        )
        .unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.methods, vec!["GET".to_string()]);
        assert_eq!(config.listener.max_connections, 1024);
    }
}
