//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DUBBO_INVOKE_CONFIG or --config)
//! 3. Environment variables

use crate::address::ServiceAddress;
use dubbo_invoke_protocol::{DEFAULT_PORT, DEFAULT_SERVICE_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Registry used when nothing else is configured.
pub const DEFAULT_REGISTRY_ADDRESS: &str = "zookeeper://127.0.0.1:2181";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Direct provider address. Empty means "use the registry".
    pub service_address: String,
    /// Registry address.
    pub registry_address: String,
    /// Port used when a direct address omits it.
    pub service_port: u16,
    /// Application name announced to providers.
    pub application: String,
    /// Service version.
    pub version: String,
    /// Service group.
    pub group: String,
    /// Whether the HTTP layer is tried when the Dubbo layers fail.
    pub http_fallback: bool,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_address: String::new(),
            registry_address: DEFAULT_REGISTRY_ADDRESS.to_string(),
            service_port: DEFAULT_PORT,
            application: "dubbo-invoke-client".to_string(),
            version: DEFAULT_SERVICE_VERSION.to_string(),
            group: String::new(),
            http_fallback: true,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from an explicit file or `DUBBO_INVOKE_CONFIG`,
    /// then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("DUBBO_INVOKE_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a variable lookup.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(address) = var("DUBBO_INVOKE_SERVICE_ADDRESS") {
            self.service_address = address;
        }
        if let Some(address) = var("DUBBO_INVOKE_REGISTRY_ADDRESS") {
            self.registry_address = address;
        }
        if let Some(port) = var("DUBBO_INVOKE_SERVICE_PORT") {
            if let Ok(port) = port.parse() {
                self.service_port = port;
            }
        }
        if let Some(application) = var("DUBBO_INVOKE_APPLICATION") {
            self.application = application;
        }
        if let Some(version) = var("DUBBO_INVOKE_VERSION") {
            self.version = version;
        }
        if let Some(group) = var("DUBBO_INVOKE_GROUP") {
            self.group = group;
        }
        if let Some(enabled) = var("DUBBO_INVOKE_HTTP_FALLBACK") {
            self.http_fallback = enabled == "1" || enabled.to_lowercase() == "true";
        }
        self.timeouts.apply_overrides(var);
    }

    /// Checks addresses and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_port == 0 {
            return Err(ConfigError::ValidationError(
                "service_port must not be 0".to_string(),
            ));
        }
        if !self.service_address.trim().is_empty() {
            ServiceAddress::classify_with_port(&self.service_address, self.service_port).map_err(
                |e| ConfigError::ValidationError(format!("service_address: {}", e)),
            )?;
        }
        if !self.registry_address.trim().is_empty() {
            ServiceAddress::classify(&self.registry_address)
                .map_err(|e| ConfigError::ValidationError(format!("registry_address: {}", e)))?;
        }
        self.timeouts.validate()
    }

    /// Picks the address for a call: a non-empty override, then the direct
    /// address, then the registry.
    pub fn select_address<'a>(&'a self, address_override: Option<&'a str>) -> &'a str {
        match address_override.map(str::trim) {
            Some(address) if !address.is_empty() => address,
            _ if !self.service_address.trim().is_empty() => self.service_address.trim(),
            _ => self.registry_address.trim(),
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect to a provider.
    pub connect_ms: u64,
    /// Response read on the direct protocol layer.
    pub direct_read_ms: u64,
    /// Generic reference call.
    pub reference_call_ms: u64,
    /// Generic reference call through a ZooKeeper registry.
    pub zookeeper_call_ms: u64,
    /// ZooKeeper session establishment and lookup.
    pub zookeeper_connect_ms: u64,
    /// Lookup against any other registry.
    pub registry_connect_ms: u64,
    /// HTTP connect.
    pub http_connect_ms: u64,
    /// HTTP response.
    pub http_read_ms: u64,
    /// How long multicast announcements are collected.
    pub multicast_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5000,
            direct_read_ms: 30_000,
            reference_call_ms: 10_000,
            zookeeper_call_ms: 8000,
            zookeeper_connect_ms: 3000,
            registry_connect_ms: 10_000,
            http_connect_ms: 5000,
            http_read_ms: 10_000,
            multicast_wait_ms: 1500,
        }
    }
}

impl TimeoutConfig {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut u64); 9] = [
            ("DUBBO_INVOKE_CONNECT_TIMEOUT_MS", &mut self.connect_ms),
            ("DUBBO_INVOKE_READ_TIMEOUT_MS", &mut self.direct_read_ms),
            ("DUBBO_INVOKE_REFERENCE_TIMEOUT_MS", &mut self.reference_call_ms),
            ("DUBBO_INVOKE_ZOOKEEPER_CALL_TIMEOUT_MS", &mut self.zookeeper_call_ms),
            ("DUBBO_INVOKE_ZOOKEEPER_CONNECT_TIMEOUT_MS", &mut self.zookeeper_connect_ms),
            ("DUBBO_INVOKE_REGISTRY_TIMEOUT_MS", &mut self.registry_connect_ms),
            ("DUBBO_INVOKE_HTTP_CONNECT_TIMEOUT_MS", &mut self.http_connect_ms),
            ("DUBBO_INVOKE_HTTP_READ_TIMEOUT_MS", &mut self.http_read_ms),
            ("DUBBO_INVOKE_MULTICAST_WAIT_MS", &mut self.multicast_wait_ms),
        ];
        for (key, field) in fields {
            if let Some(ms) = var(key).and_then(|v| v.parse().ok()) {
                *field = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = [
            ("connect_ms", self.connect_ms),
            ("direct_read_ms", self.direct_read_ms),
            ("reference_call_ms", self.reference_call_ms),
            ("zookeeper_call_ms", self.zookeeper_call_ms),
            ("zookeeper_connect_ms", self.zookeeper_connect_ms),
            ("registry_connect_ms", self.registry_connect_ms),
            ("http_connect_ms", self.http_connect_ms),
            ("http_read_ms", self.http_read_ms),
        ];
        match all.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(ConfigError::ValidationError(format!(
                "timeouts.{} must be positive",
                name
            ))),
            None => Ok(()),
        }
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn direct_read(&self) -> Duration {
        Duration::from_millis(self.direct_read_ms)
    }

    pub fn reference_call(&self) -> Duration {
        Duration::from_millis(self.reference_call_ms)
    }

    pub fn zookeeper_call(&self) -> Duration {
        Duration::from_millis(self.zookeeper_call_ms)
    }

    pub fn zookeeper_connect(&self) -> Duration {
        Duration::from_millis(self.zookeeper_connect_ms)
    }

    pub fn registry_connect(&self) -> Duration {
        Duration::from_millis(self.registry_connect_ms)
    }

    pub fn http_connect(&self) -> Duration {
        Duration::from_millis(self.http_connect_ms)
    }

    pub fn http_read(&self) -> Duration {
        Duration::from_millis(self.http_read_ms)
    }

    pub fn multicast_wait(&self) -> Duration {
        Duration::from_millis(self.multicast_wait_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.registry_address, "zookeeper://127.0.0.1:2181");
        assert_eq!(config.service_port, 20880);
        assert_eq!(config.version, "0.0.0");
        assert!(config.http_fallback);
        assert_eq!(config.timeouts.direct_read(), Duration::from_secs(30));
        assert_eq!(config.timeouts.zookeeper_connect(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ClientConfig {
            service_address: "dubbo://10.0.0.1:20880".to_string(),
            group: "blue".to_string(),
            ..ClientConfig::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        std::fs::write(
            &path,
            "registry_address: nacos://10.0.0.2:8848\ntimeouts:\n  http_read_ms: 2500\n",
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.registry_address, "nacos://10.0.0.2:8848");
        assert_eq!(config.timeouts.http_read_ms, 2500);
        assert_eq!(config.timeouts.http_connect_ms, 5000);
        assert_eq!(config.application, "dubbo-invoke-client");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let config = ClientConfig {
            version: "1.2.0".to_string(),
            http_fallback: false,
            ..ClientConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.version, "1.2.0");
        assert!(!loaded.http_fallback);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ClientConfig::from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::IoError(..)));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "service_port: [not a port]\n").unwrap();
        let bad = ClientConfig::from_file(&path).unwrap_err();
        assert!(matches!(bad, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DUBBO_INVOKE_SERVICE_ADDRESS", "10.0.0.9:20881"),
            ("DUBBO_INVOKE_HTTP_FALLBACK", "false"),
            ("DUBBO_INVOKE_SERVICE_PORT", "not-a-port"),
            ("DUBBO_INVOKE_READ_TIMEOUT_MS", "1200"),
        ]);
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.service_address, "10.0.0.9:20881");
        assert!(!config.http_fallback);
        assert_eq!(config.service_port, 20880);
        assert_eq!(config.timeouts.direct_read_ms, 1200);
    }

    #[test]
    fn test_validation() {
        let config = ClientConfig {
            registry_address: "etcd://127.0.0.1:2379".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = ClientConfig::default();
        config.timeouts.http_read_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.http_read_ms"));
    }

    #[test]
    fn test_select_address() {
        let mut config = ClientConfig::default();
        assert_eq!(config.select_address(None), "zookeeper://127.0.0.1:2181");
        assert_eq!(config.select_address(Some("  ")), "zookeeper://127.0.0.1:2181");

        config.service_address = "10.0.0.1:20880".to_string();
        assert_eq!(config.select_address(None), "10.0.0.1:20880");
        assert_eq!(config.select_address(Some("dubbo://h:1")), "dubbo://h:1");
    }
}
