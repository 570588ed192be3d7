//! Configuration types module

pub mod sandbox;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sandbox configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from defaults, config file and environment
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "safeexec=info".to_string()
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    18790
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
