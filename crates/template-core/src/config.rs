//! Server configuration
//!
//! Resolved once at construction from, in ascending priority: built-in
//! defaults, explicit options, then `MCP_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, Result};

pub const ENV_PORT: &str = "MCP_PORT";
pub const ENV_HOST: &str = "MCP_HOST";
pub const ENV_API_KEY: &str = "MCP_API_KEY";
pub const ENV_LOG_LEVEL: &str = "MCP_LOG_LEVEL";
pub const ENV_MAX_RETRIES: &str = "MCP_MAX_RETRIES";
pub const ENV_TIMEOUT: &str = "MCP_TIMEOUT";

/// Server configuration snapshot
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub api_key: Option<String>,
    pub log_level: String,
    pub max_retries: u32,
    /// Per tool call budget in milliseconds
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "localhost".to_string(),
            api_key: None,
            log_level: "info".to_string(),
            max_retries: 3,
            timeout_ms: 5000,
        }
    }
}

// Keeps the API key out of log output.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("log_level", &self.log_level)
            .field("max_retries", &self.max_retries)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Partial configuration; `None` fields leave the current value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub log_level: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Read the `MCP_*` variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: parse_var(&lookup, ENV_PORT)?,
            host: lookup(ENV_HOST),
            api_key: lookup(ENV_API_KEY),
            log_level: lookup(ENV_LOG_LEVEL),
            max_retries: parse_var(&lookup, ENV_MAX_RETRIES)?,
            timeout_ms: parse_var(&lookup, ENV_TIMEOUT)?,
        })
    }

    /// Read the `MCP_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

impl ServerConfig {
    /// Resolve configuration against the process environment
    pub fn load(options: ConfigOverrides) -> Result<Self> {
        Self::resolve(options, ConfigOverrides::from_env()?)
    }

    /// Resolve configuration from explicit options and environment values
    pub fn resolve(options: ConfigOverrides, env: ConfigOverrides) -> Result<Self> {
        let mut config = Self::default();
        config.merge(options);
        config.merge(env);

        info!(config = ?config, "Server configuration loaded");

        Ok(config)
    }

    /// Shallow-merge `updates` into this configuration
    pub fn update(&mut self, updates: ConfigOverrides) {
        self.merge(updates);
        info!(config = ?self, "Server configuration updated");
    }

    /// Tool call budget as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn merge(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(api_key) = overrides.api_key {
            self.api_key = Some(api_key);
        }
        if let Some(log_level) = overrides.log_level {
            self.log_level = log_level;
        }
        if let Some(max_retries) = overrides.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
    }
}
