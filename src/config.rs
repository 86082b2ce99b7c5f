//! Configuration module for Linna.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::{LinnaError, Result};

/// Gateway server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7350
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. An empty URL disables SQL access for scripts.
    #[serde(default = "default_db_url")]
    pub url: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_url() -> String {
    "sqlite://data/linna.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_db_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty logs to the console only.
    #[serde(default = "default_log_file")]
    pub file: String,
    /// Level for messages written by script modules. Defaults to `level`.
    #[serde(default)]
    pub runtime_level: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/linna.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            runtime_level: None,
        }
    }
}

/// Script runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Directory scanned for `.lua` modules.
    #[serde(default = "default_runtime_path")]
    pub path: String,
    /// Environment values exposed to every execution context.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Number of Lua VMs serving calls concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Instruction budget per Lua call (0 = unlimited).
    #[serde(default = "default_max_instructions")]
    pub max_instructions: u64,
    /// Memory limit per Lua VM in megabytes (0 = unlimited).
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
    /// Default timeout for outbound HTTP requests in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// Server key accepted for server-to-server RPC calls.
    #[serde(default = "default_http_key")]
    pub http_key: String,
    /// Name of this node, exposed in every context.
    #[serde(default = "default_node")]
    pub node: String,
}

fn default_runtime_path() -> String {
    "data/modules".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_max_instructions() -> u64 {
    10_000_000
}

fn default_max_memory_mb() -> usize {
    64
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_http_key() -> String {
    "defaulthttpkey".to_string()
}

fn default_node() -> String {
    "linna".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            path: default_runtime_path(),
            env: HashMap::new(),
            pool_size: default_pool_size(),
            max_instructions: default_max_instructions(),
            max_memory_mb: default_max_memory_mb(),
            http_timeout_ms: default_http_timeout_ms(),
            http_key: default_http_key(),
            node: default_node(),
        }
    }
}

/// Session token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC key used to verify session tokens presented to the gateway.
    #[serde(default = "default_encryption_key")]
    pub encryption_key: String,
    /// Lifetime of session tokens issued by scripts, in seconds.
    #[serde(default = "default_token_expiry_sec")]
    pub token_expiry_sec: u64,
}

fn default_encryption_key() -> String {
    "defaultencryptionkey".to_string()
}

fn default_token_expiry_sec() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encryption_key: default_encryption_key(),
            token_expiry_sec: default_token_expiry_sec(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Gateway server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Script runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(LinnaError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| LinnaError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `LINNA_HTTP_KEY`: server key for server-to-server calls
    /// - `LINNA_SESSION_ENCRYPTION_KEY`: session token key
    /// - `LINNA_DATABASE_URL`: database connection URL
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("LINNA_HTTP_KEY") {
            self.runtime.http_key = key;
        }
        if let Some(key) = non_empty_env("LINNA_SESSION_ENCRYPTION_KEY") {
            self.session.encryption_key = key;
        }
        if let Some(url) = non_empty_env("LINNA_DATABASE_URL") {
            self.database.url = url;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.http_key.is_empty() {
            return Err(LinnaError::Validation(
                "runtime.http_key must not be empty".to_string(),
            ));
        }
        if self.session.encryption_key.is_empty() {
            return Err(LinnaError::Validation(
                "session.encryption_key must not be empty".to_string(),
            ));
        }
        if self.runtime.pool_size == 0 {
            return Err(LinnaError::Validation(
                "runtime.pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
