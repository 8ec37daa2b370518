//! Configuration management for stowage

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the artifact store and URL cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StowageConfig {
    /// Base URL of the artifact metadata service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// File holding the bearer token used against the metadata service (optional)
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Overall timeout for a single HTTP request in seconds (default: 300)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Log every signed URL request and response at info level (default: false)
    #[serde(default)]
    pub verbose_transport: bool,

    /// Directory for spool and buffer files (default: system temp dir)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,

    /// Bytes of a length-unknown upload kept in memory before spilling
    /// to disk (default: 8MB)
    #[serde(default = "default_max_memory_buffer")]
    pub max_memory_buffer: usize,

    /// Expiry applied to new URL cache entries in seconds (default: none)
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_memory_buffer() -> usize {
    8 * 1024 * 1024 // 8MB
}

impl Default for StowageConfig {
    fn default() -> Self {
        StowageConfig {
            endpoint: default_endpoint(),
            token_file: None,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            verbose_transport: false,
            spool_dir: None,
            max_memory_buffer: default_max_memory_buffer(),
            cache_ttl_secs: None,
        }
    }
}

impl StowageConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(StowageConfig)` if loading and validation succeed
    /// * `Err(StorageError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            StorageError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: StowageConfig = serde_yaml::from_str(&content).map_err(|e| {
            StorageError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - endpoint must be an absolute http(s) URL
    /// - both timeouts must be > 0
    /// - max_memory_buffer must be > 0
    /// - cache_ttl_secs, when set, must be > 0
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| {
            StorageError::ConfigError(format!("endpoint '{}' is not a valid URL: {}", self.endpoint, e))
        })?;

        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(StorageError::ConfigError(format!(
                "endpoint must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(StorageError::ConfigError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(StorageError::ConfigError(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_memory_buffer == 0 {
            return Err(StorageError::ConfigError(
                "max_memory_buffer must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl_secs == Some(0) {
            return Err(StorageError::ConfigError(
                "cache_ttl_secs must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Build the HTTP client shared by the transport and the origin fetcher
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .connect_timeout(self.connect_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to create HTTP client: {}", e)))
    }
}
