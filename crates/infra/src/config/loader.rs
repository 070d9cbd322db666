//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! - `MARKETPULSE_MARKET_BASE_URL`: Market data API base URL (required)
//! - `MARKETPULSE_NEWS_BASE_URL`: News API base URL (required)
//! - `MARKETPULSE_LOG_LEVEL`: Default log filter
//! - `MARKETPULSE_LOG_JSON`: Emit JSON log lines (true/false)
//! - `MARKETPULSE_CONSISTENCY_DELAY_MS`: Store visibility delay
//! - `MARKETPULSE_UPDATE_MAX_RETRIES`: Attempts per optimistic update
//! - `MARKETPULSE_RECORD_TTL_SECS`: Expiry for tracked records
//! - `MARKETPULSE_REQUEST_TIMEOUT_MS`: Deadline per upstream call
//! - `MARKETPULSE_RATE_LIMIT_WAIT_MS`: Wait budget for a rate-limit slot
//!
//! Per-resource guard settings are only read from files.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.{json,toml}` and `./marketpulse.{json,toml}`
//! 2. `../config.{json,toml}` and `../../config.{json,toml}`
//! 3. The same names relative to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use marketpulse_domain::{Config, MarketPulseError, Result};

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `MarketPulseError::Config` if no source yields a valid config.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Unset optional variables keep their defaults.
///
/// # Errors
/// Returns `MarketPulseError::Config` if required variables are missing or
/// any value fails to parse.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.fetch.market_base_url = Some(env_var("MARKETPULSE_MARKET_BASE_URL")?);
    config.fetch.news_base_url = Some(env_var("MARKETPULSE_NEWS_BASE_URL")?);

    if let Ok(level) = std::env::var("MARKETPULSE_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("MARKETPULSE_LOG_JSON", config.logging.json);

    if let Some(delay) = env_parse("MARKETPULSE_CONSISTENCY_DELAY_MS")? {
        config.store.consistency_delay_ms = delay;
    }
    if let Some(retries) = env_parse("MARKETPULSE_UPDATE_MAX_RETRIES")? {
        config.store.update_max_retries = retries;
    }
    if let Some(ttl) = env_parse("MARKETPULSE_RECORD_TTL_SECS")? {
        config.store.record_ttl_secs = Some(ttl);
    }
    if let Some(timeout) = env_parse("MARKETPULSE_REQUEST_TIMEOUT_MS")? {
        config.fetch.request_timeout_ms = timeout;
    }
    if let Some(wait) = env_parse("MARKETPULSE_RATE_LIMIT_WAIT_MS")? {
        config.fetch.rate_limit_wait_ms = wait;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Format is detected by file extension.
///
/// # Errors
/// Returns `MarketPulseError::Config` if the file is missing, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(MarketPulseError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            MarketPulseError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| MarketPulseError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| MarketPulseError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| MarketPulseError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(MarketPulseError::Config(format!("Unsupported config format: {extension}"))),
    }
}

const CONFIG_FILE_NAMES: [&str; 4] =
    ["config.json", "config.toml", "marketpulse.json", "marketpulse.toml"];
const PARENT_FILE_NAMES: [&str; 4] =
    ["../config.json", "../config.toml", "../../config.json", "../../config.toml"];

/// Probe multiple paths for configuration files
///
/// Returns the first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| {
            CONFIG_FILE_NAMES
                .iter()
                .chain(PARENT_FILE_NAMES.iter())
                .map(move |name| root.join(name))
        })
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        MarketPulseError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Parse an optional numeric variable; unset means `None`
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MarketPulseError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
