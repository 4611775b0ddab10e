use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default chunk size for streaming (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk that fits in tonic's default 4 MiB message limit with framing overhead
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024 - 1024;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Server-side storage configuration
    pub storage: StorageConfig,

    /// Client configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for gRPC
    pub listen_address: SocketAddr,

    /// Concurrent request limits per operation
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Concurrent in-flight request limits. A limit of 0 disables the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_limit")]
    pub upload_requests: usize,

    #[serde(default = "default_limit")]
    pub download_requests: usize,

    #[serde(default = "default_limit")]
    pub list_requests: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            upload_requests: default_limit(),
            download_requests: default_limit(),
            list_requests: default_limit(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Flat directory holding uploaded files
    pub root_dir: PathBuf,

    /// Chunk size for streaming in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address (host:port)
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Directory receiving downloaded files
    #[serde(default = "default_client_data_dir")]
    pub data_dir: PathBuf,

    /// Deadline applied to every remote call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Chunk size for uploads in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            data_dir: default_client_data_dir(),
            request_timeout_secs: default_request_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

// Default values for configuration options
fn default_limit() -> usize { 10 }
fn default_chunk_size() -> usize { DEFAULT_CHUNK_SIZE }
fn default_server_address() -> String { "127.0.0.1:50051".to_string() }
fn default_client_data_dir() -> PathBuf { PathBuf::from("./client_data") }
fn default_request_timeout() -> u64 { 60 }

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 50051)),
                limits: LimitsConfig::default(),
            },
            storage: StorageConfig {
                root_dir: PathBuf::from("./server_data"),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path.as_ref(), content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Create a default config file
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Self::default();
        config.to_file(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_address.port() == 0 {
            anyhow::bail!("Invalid listen address port");
        }

        if self.storage.root_dir.as_os_str().is_empty() {
            anyhow::bail!("Storage root directory cannot be empty");
        }

        validate_limit("server.limits.upload_requests", self.server.limits.upload_requests)?;
        validate_limit("server.limits.download_requests", self.server.limits.download_requests)?;
        validate_limit("server.limits.list_requests", self.server.limits.list_requests)?;

        validate_chunk_size("storage.chunk_size", self.storage.chunk_size)?;
        validate_chunk_size("client.chunk_size", self.client.chunk_size)?;

        if self.client.server_address.trim().is_empty() {
            anyhow::bail!("Client server address cannot be empty");
        }

        if self.client.data_dir.as_os_str().is_empty() {
            anyhow::bail!("Client data directory cannot be empty");
        }

        if self.client.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        Ok(())
    }
}

fn validate_limit(field: &str, limit: usize) -> Result<()> {
    if limit > Semaphore::MAX_PERMITS {
        anyhow::bail!("{} must not exceed {}", field, Semaphore::MAX_PERMITS);
    }
    Ok(())
}

fn validate_chunk_size(field: &str, chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        anyhow::bail!("{} must be greater than 0", field);
    }
    if chunk_size > MAX_CHUNK_SIZE {
        anyhow::bail!("{} must not exceed {} bytes", field, MAX_CHUNK_SIZE);
    }
    Ok(())
}
