//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KITTEN_CONFIG)
//! 3. Environment variables

use kitten_protocol::{FrameLimits, DEFAULT_DEBUG_PATH, DEFAULT_PORT, DEFAULT_RPC_PATH};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// RPC endpoint configuration.
    pub rpc: RpcConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("KITTEN_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
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
        self.network.apply_env_overrides();
        self.rpc.apply_env_overrides();
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.rpc.validate()
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

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("KITTEN_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("KITTEN_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("KITTEN_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "network.idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// RPC endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// HTTP path accepting `CONNECT` for RPC traffic.
    pub rpc_path: String,
    /// HTTP path of the debug endpoint (also accepts `CONNECT`).
    pub debug_path: String,
    /// Largest metadata block accepted from a peer, in bytes.
    pub max_metadata_size: u32,
    /// Largest payload accepted from a peer, in bytes.
    pub max_payload_size: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let limits = FrameLimits::default();
        Self {
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            debug_path: DEFAULT_DEBUG_PATH.to_string(),
            max_metadata_size: limits.max_metadata_len,
            max_payload_size: limits.max_payload_len,
        }
    }
}

impl RpcConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("KITTEN_RPC_PATH") {
            self.rpc_path = path;
        }

        if let Ok(path) = std::env::var("KITTEN_DEBUG_PATH") {
            self.debug_path = path;
        }

        if let Ok(size) = std::env::var("KITTEN_MAX_METADATA_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_metadata_size = n;
            }
        }

        if let Ok(size) = std::env::var("KITTEN_MAX_PAYLOAD_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_payload_size = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [("rpc_path", &self.rpc_path), ("debug_path", &self.debug_path)] {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "rpc.{} must start with '/', got '{}'",
                    name, path
                )));
            }
        }
        if self.rpc_path == self.debug_path {
            return Err(ConfigError::ValidationError(
                "rpc.rpc_path and rpc.debug_path must differ".to_string(),
            ));
        }
        if self.max_metadata_size == 0 || self.max_payload_size == 0 {
            return Err(ConfigError::ValidationError(
                "rpc size limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the frame limits applied to incoming messages.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_metadata_len: self.max_metadata_size,
            max_payload_len: self.max_payload_size,
        }
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

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.rpc.rpc_path, "/_kittenRpc_");
        assert_eq!(config.rpc.debug_path, "/debug/kittenRpc");
        assert_eq!(config.rpc.frame_limits(), FrameLimits::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.rpc.rpc_path, config.rpc.rpc_path);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "network:\n  bind_addr: \"0.0.0.0:9000\"\nrpc:\n  max_payload_size: 4096\n";
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.network.bind_addr.port(), 9000);
        assert_eq!(parsed.network.max_connections, 1000);
        assert_eq!(parsed.rpc.max_payload_size, 4096);
        assert_eq!(parsed.rpc.rpc_path, DEFAULT_RPC_PATH);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kitten.yaml");

        let mut config = Config::default();
        config.rpc.rpc_path = "/rpc".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.rpc.rpc_path, "/rpc");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/kitten.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.rpc.rpc_path = "no-slash".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.rpc.debug_path = config.rpc.rpc_path.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.max_payload_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
