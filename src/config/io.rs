//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use super::types::BotConfig;
use crate::error::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "MIRAI_CONFIG";

/// File picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "mirai-link.toml";

/// Load configuration with layered precedence:
/// 1. Config file (`$MIRAI_CONFIG`, else `./mirai-link.toml`) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<BotConfig> {
    dotenvy::dotenv().ok();

    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = if path.exists() {
        load_config_from_path(&path)?
    } else {
        BotConfig::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<BotConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: BotConfig = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variable. Unparseable values are
/// ignored and the existing setting is kept.
pub fn apply_env_overrides(config: &mut BotConfig) {
    dotenvy::dotenv().ok();
    overlay(config, |key| std::env::var(key).ok());
}

fn overlay(config: &mut BotConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = var("MIRAI_ENDPOINT") {
        if let Ok(v) = endpoint.parse() {
            config.endpoint = v;
        }
    }
    if let Some(key) = var("MIRAI_VERIFY_KEY") {
        config.verify_key = SecretString::from(key);
    }
    if let Some(qq) = var("MIRAI_QQ") {
        if let Ok(v) = qq.trim().parse() {
            config.account_id = v;
        }
    }
    if let Some(mode) = var("MIRAI_TRANSPORT") {
        if let Ok(v) = mode.parse() {
            config.transport = v;
        }
    }
    if let Some(id) = var("MIRAI_RESERVED_SYNC_ID") {
        if let Ok(v) = id.trim().parse() {
            config.reserved_sync_id = v;
        }
    }
    if let Some(interval) = var("MIRAI_POLL_INTERVAL") {
        if let Ok(v) = humantime::parse_duration(interval.trim()) {
            config.poll_interval = v;
        }
    }
    if let Some(count) = var("MIRAI_FETCH_COUNT") {
        if let Ok(v) = count.trim().parse() {
            config.fetch_count = v;
        }
    }
    if let Some(timeout) = var("MIRAI_CALL_TIMEOUT") {
        if let Ok(v) = humantime::parse_duration(timeout.trim()) {
            config.call_timeout = v;
        }
    }
    if let Some(version) = var("MIRAI_PROTOCOL_VERSION") {
        if let Ok(v) = version.parse() {
            config.protocol_version = Some(v);
        }
    }

    // Logging overrides
    if let Some(level) = var("RUST_LOG") {
        config.log.level = level;
    }
    if let Some(format) = var("LOG_FORMAT") {
        if let Ok(v) = format.parse() {
            config.log.format = v;
        }
    }
}

/// Save configuration to a file
///
/// The credential is never written out.
pub fn save_config(config: &BotConfig, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
