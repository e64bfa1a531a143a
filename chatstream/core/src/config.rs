//! Client Configuration
//!
//! Endpoint, timeout and framing settings for the streaming client, loaded
//! from an optional TOML file at `$XDG_CONFIG_HOME/chatstream/config.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [client]
//! base_url = "http://localhost:8000/api/"
//! connect_timeout_ms = 5000
//! request_timeout_ms = 30000
//! idle_timeout_ms = 120000
//! update_channel_capacity = 100
//!
//! [frame]
//! tag = "data:"
//! terminator = ""
//! max_frame_bytes = 1048576
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default completions API root
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";

/// Default frame tag (server-sent events `data` field)
pub const DEFAULT_FRAME_TAG: &str = "data:";

/// Default frame terminator (an empty line)
pub const DEFAULT_FRAME_TERMINATOR: &str = "";

/// Default upper bound on a single frame's payload (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Framing constants of the inbound stream
///
/// The upstream provider defines these; they are configuration, not protocol
/// assumptions baked into the reader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Line prefix that marks a payload line
    pub tag: String,
    /// Line that ends a frame; empty means a blank line
    pub terminator: String,
    /// Frames whose payload exceeds this are dropped
    pub max_frame_bytes: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_FRAME_TAG.to_string(),
            terminator: DEFAULT_FRAME_TERMINATOR.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Resolved client configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Root of the completions API
    pub base_url: String,
    /// Timeout for non-streaming requests (model listing, health checks)
    pub request_timeout_ms: u64,
    /// TCP/TLS connect timeout
    pub connect_timeout_ms: u64,
    /// Maximum silence between stream fragments (0 = wait forever)
    pub idle_timeout_ms: u64,
    /// Capacity of the observer notification channel
    pub update_channel_capacity: usize,
    /// Inbound framing
    pub frame: FrameConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 5000,
            idle_timeout_ms: 120_000,
            update_channel_capacity: 100,
            frame: FrameConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// Environment variables:
    /// - `CHATSTREAM_BASE_URL`: API root
    /// - `CHATSTREAM_REQUEST_TIMEOUT`: non-streaming request timeout in ms
    /// - `CHATSTREAM_CONNECT_TIMEOUT`: connect timeout in ms
    /// - `CHATSTREAM_IDLE_TIMEOUT`: stream idle timeout in ms (0 disables)
    /// - `CHATSTREAM_FRAME_TAG`: payload line prefix
    /// - `CHATSTREAM_FRAME_TERMINATOR`: line that ends a frame
    /// - `CHATSTREAM_MAX_FRAME_BYTES`: frame size limit
    #[must_use]
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(base_url) = lookup("CHATSTREAM_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(ms) = number("CHATSTREAM_REQUEST_TIMEOUT") {
            self.request_timeout_ms = ms;
        }
        if let Some(ms) = number("CHATSTREAM_CONNECT_TIMEOUT") {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = number("CHATSTREAM_IDLE_TIMEOUT") {
            self.idle_timeout_ms = ms;
        }
        if let Some(tag) = lookup("CHATSTREAM_FRAME_TAG") {
            self.frame.tag = tag;
        }
        if let Some(terminator) = lookup("CHATSTREAM_FRAME_TERMINATOR") {
            self.frame.terminator = terminator;
        }
        if let Some(bytes) = lookup("CHATSTREAM_MAX_FRAME_BYTES").and_then(|v| v.trim().parse().ok()) {
            self.frame.max_frame_bytes = bytes;
        }
        self
    }

    /// Apply values present in a parsed config file
    #[must_use]
    pub fn with_file(mut self, file: &ConfigToml) -> Self {
        let client = &file.client;
        if let Some(ref base_url) = client.base_url {
            self.base_url.clone_from(base_url);
        }
        if let Some(ms) = client.request_timeout_ms {
            self.request_timeout_ms = ms;
        }
        if let Some(ms) = client.connect_timeout_ms {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = client.idle_timeout_ms {
            self.idle_timeout_ms = ms;
        }
        if let Some(capacity) = client.update_channel_capacity {
            self.update_channel_capacity = capacity;
        }
        if let Some(ref tag) = file.frame.tag {
            self.frame.tag.clone_from(tag);
        }
        if let Some(ref terminator) = file.frame.terminator {
            self.frame.terminator.clone_from(terminator);
        }
        if let Some(bytes) = file.frame.max_frame_bytes {
            self.frame.max_frame_bytes = bytes;
        }
        self
    }

    /// Check values that would otherwise fail late
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::ValidationError(format!("base_url {:?}: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.frame.tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "frame tag must not be empty".to_string(),
            ));
        }
        if self.frame.terminator.contains(['\r', '\n']) {
            return Err(ConfigError::ValidationError(
                "frame terminator must be a single line".to_string(),
            ));
        }
        if !self.frame.terminator.is_empty() && self.frame.terminator.starts_with(&self.frame.tag) {
            return Err(ConfigError::ValidationError(
                "frame terminator must not look like a payload line".to_string(),
            ));
        }
        if self.frame.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "update_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout for non-streaming requests
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Stream idle timeout, if enabled
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

/// `[client]` section of the config file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// API root
    pub base_url: Option<String>,
    /// Non-streaming request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Stream idle timeout in milliseconds
    pub idle_timeout_ms: Option<u64>,
    /// Observer channel capacity
    pub update_channel_capacity: Option<usize>,
}

/// `[frame]` section of the config file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameToml {
    /// Payload line prefix
    pub tag: Option<String>,
    /// Line that ends a frame
    pub terminator: Option<String>,
    /// Frame size limit
    pub max_frame_bytes: Option<usize>,
}

/// Root of the config file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    /// Client settings
    pub client: ClientToml,
    /// Framing settings
    pub frame: FrameToml,
}

/// Default config file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatstream").join("config.toml"))
}

/// Parse a config file
///
/// # Errors
///
/// Returns `ReadError` if the file cannot be read and `ParseError` if it is
/// not valid TOML for [`ConfigToml`].
pub fn load_config_from_path(path: &Path) -> Result<ConfigToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Resolve the configuration: defaults, then the file (if any), then env
///
/// `path` overrides the default location; a missing default file is not an
/// error, a missing explicit file is.
///
/// # Errors
///
/// Propagates file and validation errors.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    let file = match path {
        Some(path) => Some(load_config_from_path(path)?),
        None => match default_config_path() {
            Some(default) if default.exists() => Some(load_config_from_path(&default)?),
            _ => None,
        },
    };

    if let Some(ref file) = file {
        config = config.with_file(file);
    }

    let config = config.with_env(|key| std::env::var(key).ok());
    config.validate()?;

    tracing::debug!(
        base_url = %config.base_url,
        idle_timeout_ms = config.idle_timeout_ms,
        from_file = file.is_some(),
        "Resolved client configuration"
    );

    Ok(config)
}
