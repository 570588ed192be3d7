//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    parse_config(&content, path.extension().and_then(|ext| ext.to_str()))
}

/// Parse configuration text, using the file extension as a format hint
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config> {
    let config: Config = match extension {
        Some("json") | Some("json5") => json5::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?,
        Some("toml") => toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?,
        _ => json5::from_str(content)
            .or_else(|_| toml::from_str(content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?,
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any `SAFEEXEC_*` variables that are set.
/// Unparseable values are ignored and the file/default value is kept.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_overrides_from(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let sandbox = &mut config.sandbox;

    if let Some(order) = var("SAFEEXEC_BACKENDS") {
        let parsed: std::result::Result<Vec<_>, _> = order
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect();
        match parsed {
            Ok(kinds) => sandbox.preferred_backend_order = kinds,
            Err(e) => tracing::warn!("Ignoring SAFEEXEC_BACKENDS: {}", e),
        }
    }
    if let Some(v) = var("SAFEEXEC_ALLOW_DIRECT_FALLBACK") {
        sandbox.allow_direct_fallback = is_truthy(&v);
    }
    if let Some(dir) = var("SAFEEXEC_WORKSPACE") {
        sandbox.workspace_root_base_dir = std::path::PathBuf::from(dir);
    }
    if let Some(v) = var("SAFEEXEC_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        sandbox.default_timeout_secs = v;
    }
    if let Some(v) = var("SAFEEXEC_MEMORY_LIMIT_MB").and_then(|v| v.parse().ok()) {
        sandbox.default_memory_limit_mb = v;
    }
    if let Some(v) = var("SAFEEXEC_MAX_OUTPUT_BYTES").and_then(|v| v.parse().ok()) {
        sandbox.max_output_bytes = v;
    }
    if let Some(v) = var("SAFEEXEC_ALLOW_INSTALL_EGRESS") {
        sandbox.allow_install_network_egress = is_truthy(&v);
    }
    if let Some(image) = var("SAFEEXEC_CONTAINER_IMAGE") {
        sandbox.container.image = image;
    }
    if let Some(python) = var("SAFEEXEC_PYTHON") {
        sandbox.python_interpreter = python;
    }

    if let Some(v) = var("SAFEEXEC_LOG_JSON") {
        config.logging.json = is_truthy(&v);
    }
    if let Some(bind) = var("SAFEEXEC_GATEWAY_BIND") {
        config.gateway.bind = bind;
    }
    if let Some(port) = var("SAFEEXEC_GATEWAY_PORT").and_then(|v| v.parse().ok()) {
        config.gateway.port = port;
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
