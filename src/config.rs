//! Configuration management for the MCP auth playground
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{PlaygroundError, Result};
use crate::transport::RequestMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Every section has defaults, so an empty YAML document is a valid
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Flow defaults (server URL, request mode, OAuth client settings)
    #[serde(default)]
    pub flow: FlowConfig,
    /// Proxy relay settings
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Extension bridge settings
    #[serde(default)]
    pub extension: ExtensionConfig,
    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
    /// State persistence settings
    #[serde(default)]
    pub state: StateConfig,
}

/// Defaults for a fresh flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// MCP server URL used when no saved state exists
    #[serde(default)]
    pub default_server_url: String,

    /// Request mode used when no saved state exists
    #[serde(default)]
    pub default_request_mode: RequestMode,

    /// Redirect URI registered with the authorization server
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Client name sent during dynamic registration
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/callback".to_string()
}

fn default_client_name() -> String {
    "My MCP App".to_string()
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_server_url: String::new(),
            default_request_mode: RequestMode::default(),
            redirect_uri: default_redirect_uri(),
            client_name: default_client_name(),
        }
    }
}

/// Proxy relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Where the relay is reached when relaying requests
    #[serde(default = "default_proxy_base_url")]
    pub base_url: String,

    /// Seconds between background health checks
    #[serde(default = "default_health_interval")]
    pub health_interval_seconds: u64,

    /// Upper bound for a single health check
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,

    /// Address `serve-proxy` listens on
    #[serde(default = "default_proxy_bind")]
    pub bind: String,
}

fn default_proxy_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    3
}

fn default_proxy_bind() -> String {
    "0.0.0.0:3001".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: default_proxy_base_url(),
            health_interval_seconds: default_health_interval(),
            health_timeout_seconds: default_health_timeout(),
            bind: default_proxy_bind(),
        }
    }
}

/// Extension bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Start the in-process bridge agent
    #[serde(default = "default_extension_enabled")]
    pub enabled: bool,

    /// Seconds to wait for a bridge reply
    #[serde(default = "default_extension_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_extension_enabled() -> bool {
    true
}

fn default_extension_timeout() -> u64 {
    30
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: default_extension_enabled(),
            request_timeout_seconds: default_extension_timeout(),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
        }
    }
}

/// State persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// State file; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PlaygroundError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| PlaygroundError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("PLAYGROUND_SERVER_URL") {
            self.flow.default_server_url = url;
        }

        if let Ok(mode) = std::env::var("PLAYGROUND_REQUEST_MODE") {
            match mode.parse() {
                Ok(value) => self.flow.default_request_mode = value,
                Err(_) => tracing::warn!("Invalid PLAYGROUND_REQUEST_MODE: {}", mode),
            }
        }

        if let Ok(uri) = std::env::var("PLAYGROUND_REDIRECT_URI") {
            self.flow.redirect_uri = uri;
        }

        if let Ok(name) = std::env::var("PLAYGROUND_CLIENT_NAME") {
            self.flow.client_name = name;
        }

        if let Ok(url) = std::env::var("PLAYGROUND_PROXY_URL") {
            self.proxy.base_url = url;
        }

        if let Ok(bind) = std::env::var("PLAYGROUND_PROXY_BIND") {
            self.proxy.bind = bind;
        }

        if let Ok(enabled) = std::env::var("PLAYGROUND_EXTENSION_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.extension.enabled = true,
                "false" | "0" | "no" => self.extension.enabled = false,
                _ => tracing::warn!("Invalid PLAYGROUND_EXTENSION_ENABLED: {}", enabled),
            }
        }

        if let Ok(timeout) = std::env::var("PLAYGROUND_HTTP_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.http.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PLAYGROUND_HTTP_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(path) = std::env::var("PLAYGROUND_STATE_FILE") {
            self.state.path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(path) = &cli.state_file {
            tracing::debug!("Using state file override from CLI: {}", path.display());
            self.state.path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Config`] for the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !self.flow.default_server_url.is_empty() {
            require_http_url("flow.default_server_url", &self.flow.default_server_url)?;
        }

        require_http_url("flow.redirect_uri", &self.flow.redirect_uri)?;
        require_http_url("proxy.base_url", &self.proxy.base_url)?;

        if self.flow.client_name.trim().is_empty() {
            return Err(
                PlaygroundError::Config("flow.client_name cannot be empty".to_string()).into(),
            );
        }

        if self.proxy.health_interval_seconds == 0 {
            return Err(PlaygroundError::Config(
                "proxy.health_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.proxy.health_timeout_seconds == 0 {
            return Err(PlaygroundError::Config(
                "proxy.health_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.proxy.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(PlaygroundError::Config(format!(
                "proxy.bind is not a socket address: {}",
                self.proxy.bind
            ))
            .into());
        }

        if self.extension.request_timeout_seconds == 0 {
            return Err(PlaygroundError::Config(
                "extension.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.http.timeout_seconds == 0 {
            return Err(PlaygroundError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn require_http_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value)
        .map_err(|e| PlaygroundError::Config(format!("{} is not a valid URL: {}", field, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PlaygroundError::Config(format!(
            "{} must use http or https, got {}",
            field,
            url.scheme()
        ))
        .into());
    }
    Ok(())
}
