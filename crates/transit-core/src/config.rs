//! Configuration resolution for Transit.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/transit/settings.json)
//! 3. Project config (.transit/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default capacity of a byte pipe, in bytes.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Complete Transit configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Whether sessions may be created at all.
    pub enabled: bool,
    /// Capacity of each byte pipe created for a stream direction.
    pub pipe_capacity: usize,
    /// Maximum number of outgoing datagrams awaiting an engine outcome.
    pub max_outstanding_datagrams: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            max_outstanding_datagrams: 1,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(global_path);
    }
    if let Some(dir) = project_dir {
        let project_path = dir.join(".transit").join("settings.json");
        if project_path.exists() {
            layers.push(project_path);
        }
    }

    let mut config = resolve_layers(&layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load a single explicit config file, then apply environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut config = resolve_layers(&[path.to_path_buf()])?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Merge config files over the defaults, later files winning key by key.
fn resolve_layers(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for path in paths {
        merge_values(&mut merged, read_layer(path)?);
    }
    Ok(serde_json::from_value(merged)?)
}

/// Read one file as raw JSON so absent keys stay absent.
fn read_layer(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let layer: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    // Type errors are reported against the file that caused them.
    serde_json::from_value::<Config>(layer.clone()).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(layer)
}

fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".transit").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/transit/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("transit").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Apply `TRANSIT_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("TRANSIT_ENABLED")
        && let Some(enabled) = parse_bool(&val)
    {
        config.broker.enabled = enabled;
    }
    if let Some(val) = lookup("TRANSIT_PIPE_CAPACITY")
        && let Ok(n) = val.parse()
    {
        config.broker.pipe_capacity = n;
    }
    if let Some(val) = lookup("TRANSIT_MAX_OUTSTANDING_DATAGRAMS")
        && let Ok(n) = val.parse()
    {
        config.broker.max_outstanding_datagrams = n;
    }
    if let Some(val) = lookup("TRANSIT_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("TRANSIT_LOG_JSON")
        && let Some(json) = parse_bool(&val)
    {
        config.logging.json = json;
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
