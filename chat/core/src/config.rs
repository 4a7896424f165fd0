//! TOML Configuration File Support
//!
//! Client configuration lives at `~/.config/persona-chat/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8000"
//! connect_timeout_ms = 10000
//!
//! [auth]
//! token_file = "/run/user/1000/persona-chat/token"
//!
//! [engine]
//! exchange_timeout_secs = 120   # 0 disables
//! idle_timeout_secs = 60        # 0 disables
//! max_message_chars = 2000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::transport::{
    CredentialError, CredentialProvider, StaticCredentials, TokenFileCredentials,
};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Environment variable overriding `server.base_url`
pub const ENV_API_URL: &str = "PERSONA_CHAT_API_URL";
/// Environment variable overriding `auth.token`
pub const ENV_TOKEN: &str = "PERSONA_CHAT_TOKEN";
/// Environment variable overriding `auth.token_file`
pub const ENV_TOKEN_FILE: &str = "PERSONA_CHAT_TOKEN_FILE";
/// Environment variable overriding `engine.exchange_timeout_secs`
pub const ENV_EXCHANGE_TIMEOUT: &str = "PERSONA_CHAT_EXCHANGE_TIMEOUT_SECS";
/// Environment variable overriding `engine.idle_timeout_secs`
pub const ENV_IDLE_TIMEOUT: &str = "PERSONA_CHAT_IDLE_TIMEOUT_SECS";

// =============================================================================
// Error Types
// =============================================================================

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// API root URL
    pub base_url: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Auth section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthToml {
    /// Bearer token
    pub token: Option<String>,

    /// File holding the bearer token
    pub token_file: Option<PathBuf>,
}

/// Engine section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Whole-exchange deadline in seconds (0 = none)
    pub exchange_timeout_secs: Option<u64>,

    /// Maximum silence between frames in seconds (0 = none)
    pub idle_timeout_secs: Option<u64>,

    /// Maximum outgoing message length in characters
    pub max_message_chars: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Auth configuration section
    pub auth: AuthToml,

    /// Engine configuration section
    pub engine: EngineToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Where to reach the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// API root URL
    pub base_url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the bearer token comes from
///
/// An explicit token wins over a token file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// Bearer token
    pub token: Option<String>,
    /// File holding the bearer token
    pub token_file: Option<PathBuf>,
}

impl AuthConfig {
    /// Build the credential provider this configuration describes
    ///
    /// # Errors
    ///
    /// Fails when a token file is configured but cannot be read.
    pub fn credentials(&self) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Arc::new(StaticCredentials::new(token.trim())));
        }
        match &self.token_file {
            Some(path) => Ok(Arc::new(TokenFileCredentials::load(path)?)),
            None => Ok(Arc::new(StaticCredentials::anonymous())),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_file", &self.token_file)
            .finish()
    }
}

/// Resolved client configuration
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Credential configuration
    pub auth: AuthConfig,

    /// Engine limits and timeouts
    pub engine: EngineConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would otherwise fail later, far from their origin
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty or non-http(s)
    /// base URL, or a zero message length limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.server.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "server.base_url must not be empty".to_string(),
            ));
        }
        match reqwest::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::ValidationError(format!(
                    "server.base_url must use http or https, got {}",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(ConfigError::ValidationError(format!(
                    "server.base_url {base_url:?} is not a valid URL: {e}"
                )))
            }
        }
        if self.engine.max_message_chars == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_message_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/persona-chat/client.toml` or
/// `~/.config/persona-chat/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("persona-chat").join("client.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, resolving environment variables through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config, config_path);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then_some(Duration::from_secs(secs))
}

/// Apply TOML configuration values to the config struct
///
/// A relative `token_file` is resolved against the config file's directory.
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml, config_path: &Path) {
    if let Some(ref url) = toml.server.base_url {
        config.server.base_url = url.clone();
    }
    if let Some(timeout) = toml.server.connect_timeout_ms {
        config.server.connect_timeout = Duration::from_millis(timeout);
    }

    if toml.auth.token.is_some() {
        config.auth.token = toml.auth.token.clone();
    }
    if let Some(ref file) = toml.auth.token_file {
        let resolved = match config_path.parent() {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.clone(),
        };
        config.auth.token_file = Some(resolved);
    }

    if let Some(secs) = toml.engine.exchange_timeout_secs {
        config.engine.exchange_timeout = secs_or_none(secs);
    }
    if let Some(secs) = toml.engine.idle_timeout_secs {
        config.engine.idle_timeout = secs_or_none(secs);
    }
    if let Some(chars) = toml.engine.max_message_chars {
        config.engine.max_message_chars = chars;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env(ENV_API_URL) {
        config.server.base_url = url;
        config.source = ConfigSource::Env;
    }
    let env_token = env(ENV_TOKEN);
    if let Some(file) = env(ENV_TOKEN_FILE) {
        // A token file from the environment outranks a token from the file
        if env_token.is_none() {
            config.auth.token = None;
        }
        config.auth.token_file = Some(PathBuf::from(file));
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env_token {
        config.auth.token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env(ENV_EXCHANGE_TIMEOUT) {
        match timeout.parse::<u64>() {
            Ok(secs) => {
                config.engine.exchange_timeout = secs_or_none(secs);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(var = ENV_EXCHANGE_TIMEOUT, value = %timeout, "Ignoring unparseable value"),
        }
    }
    if let Some(timeout) = env(ENV_IDLE_TIMEOUT) {
        match timeout.parse::<u64>() {
            Ok(secs) => {
                config.engine.idle_timeout = secs_or_none(secs);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(var = ENV_IDLE_TIMEOUT, value = %timeout, "Ignoring unparseable value"),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Token override
    pub token: Option<String>,

    /// Exchange timeout override (seconds, 0 = none)
    pub exchange_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set token override
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set exchange timeout override
    #[must_use]
    pub fn with_exchange_timeout_secs(mut self, secs: u64) -> Self {
        self.exchange_timeout_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.base_url.is_some() || self.token.is_some() || self.exchange_timeout_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.server.base_url = url.clone();
        }
        if let Some(ref token) = self.token {
            config.auth.token = Some(token.clone());
        }
        if let Some(secs) = self.exchange_timeout_secs {
            config.engine.exchange_timeout = secs_or_none(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
