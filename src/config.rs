//! Application configuration
//!
//! Loaded from a TOML file, then overridden by environment variables, then
//! by command-line flags (applied by the binaries).
//!
//! ```toml
//! [server]
//! bind_address = "127.0.0.1"
//! http_port = 8079
//!
//! [client]
//! server_url = "http://127.0.0.1:8079"
//! poll_interval_ms = 1000
//! request_timeout_ms = 2000
//!
//! [pipeline]
//! driver = "process"
//! program = "gst-launch-1.0"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::*;
use crate::driver::{PipelineDriver, ProcessDriver, SimulatedDriver};
use crate::error::ConfigError;

/// Overrides the server bind address (`host:port`)
pub const ENV_BIND: &str = "STREAM_CONTROL_BIND";
/// Overrides the server URL used by the viewer
pub const ENV_SERVER_URL: &str = "STREAM_CONTROL_SERVER_URL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub pipeline: PipelineConfig,
}

/// Control API server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.http_port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidAddress(format!("{}:{}", self.bind_address, self.http_port))
            })
    }

    /// Set address and port from a `host:port` string
    pub fn set_bind(&mut self, bind: &str) -> Result<(), ConfigError> {
        let addr: SocketAddr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(bind.to_string()))?;
        self.bind_address = addr.ip().to_string();
        self.http_port = addr.port();
        Ok(())
    }
}

/// Viewer-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Which driver implementation backs a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Process,
    Simulated,
}

/// Pipeline driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub driver: DriverKind,
    pub program: String,
    /// Pipeline run by the server
    pub sender_description: String,
    /// Pipeline run by the viewer
    pub receiver_description: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Process,
            program: DEFAULT_PIPELINE_PROGRAM.to_string(),
            sender_description: DEFAULT_SENDER_PIPELINE.to_string(),
            receiver_description: DEFAULT_RECEIVER_PIPELINE.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn sender_driver(&self) -> Arc<dyn PipelineDriver> {
        self.build_driver("sender", &self.sender_description)
    }

    pub fn receiver_driver(&self) -> Arc<dyn PipelineDriver> {
        self.build_driver("receiver", &self.receiver_description)
    }

    fn build_driver(&self, name: &str, description: &str) -> Arc<dyn PipelineDriver> {
        match self.driver {
            DriverKind::Process => Arc::new(ProcessDriver::with_description(&self.program, description)),
            DriverKind::Simulated => Arc::new(SimulatedDriver::new(name)),
        }
    }
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/stream-control/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stream-control").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    ///
    /// An explicit path that does not exist is an error; a missing default file
    /// is not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.set_bind(&bind)?;
        }
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.client.server_url = url;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        let url = self.client.server_url.trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidAddress(self.client.server_url.clone()));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be greater than 0".into()));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let config = AppConfig::default();
        assert_eq!(config.server.socket_addr().unwrap(), "127.0.0.1:8079".parse().unwrap());
        assert_eq!(config.client.server_url, "http://127.0.0.1:8079");
        assert_eq!(config.client.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            http_port = 9000

            [pipeline]
            driver = "simulated"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.pipeline.driver, DriverKind::Simulated);
        assert_eq!(config.pipeline.program, DEFAULT_PIPELINE_PROGRAM);
    }

    #[test]
    fn test_env_overrides_addresses() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                ENV_BIND => Some("0.0.0.0:9100".into()),
                ENV_SERVER_URL => Some("http://10.0.0.5:9100".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.http_port, 9100);
        assert_eq!(config.client.server_url, "http://10.0.0.5:9100");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_toml("[server]\nbind_address = \"not an ip\""),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[client]\npoll_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[client]\nserver_url = \"127.0.0.1:8079\""),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(AppConfig::from_toml("server = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/stream-control.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
