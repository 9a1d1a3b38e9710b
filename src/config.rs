// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Persists daemon settings, the active control mode, controller tuning and
//! curve definitions to TOML. Default path: `/etc/gpufan/config.toml`.
//!
//! Single curves can also be exported to / imported from standalone JSON
//! files of the form `{"name": ..., "points": [[temp, fan], ...]}`.

use crate::controller::ControllerTuning;
use crate::curve::{self, FanCurve};
use crate::engine::FanMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gpufan/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/gpufan.sock";

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Active mode and controller tuning.
    #[serde(default)]
    pub control: ControlConfig,

    /// Named fan curves.
    #[serde(default = "default_curves")]
    pub curves: Vec<FanCurve>,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Poll interval for the control loop, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Whether to hand the fan back to the driver on daemon exit.
    #[serde(default = "default_true")]
    pub restore_on_exit: bool,

    /// DRM card to drive (e.g. "card0"). First AMD card if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            restore_on_exit: true,
            card: None,
        }
    }
}

/// What the control loop does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub mode: FanMode,

    #[serde(default)]
    pub tuning: ControllerTuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            control: ControlConfig::default(),
            curves: default_curves(),
        }
    }
}

impl Config {
    pub fn find_curve(&self, name: &str) -> Option<&FanCurve> {
        self.curves.iter().find(|c| c.name() == name)
    }

    /// Replace the curve with the same name, or append it.
    pub fn upsert_curve(&mut self, curve: FanCurve) {
        match self.curves.iter_mut().find(|c| c.name() == curve.name()) {
            Some(existing) => *existing = curve,
            None => self.curves.push(curve),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;
    config
        .control
        .tuning
        .validate()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    create_parent(path)?;

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Curve files
// ---------------------------------------------------------------------------

/// Load a single curve from a JSON file. A missing file is `Ok(None)`;
/// a file that doesn't hold a valid curve is an error.
pub fn load_curve(path: &Path) -> io::Result<Option<FanCurve>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)?;
    let curve: FanCurve = serde_json::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse curve file {}: {e}", path.display()),
        )
    })?;

    log::info!("Loaded curve '{}' from {}", curve.name(), path.display());
    Ok(Some(curve))
}

/// Save a single curve as JSON, creating parent directories if needed.
pub fn save_curve(path: &Path, curve: &FanCurve) -> io::Result<()> {
    create_parent(path)?;
    let contents = serde_json::to_string_pretty(curve)?;
    fs::write(path, contents)?;
    log::info!("Saved curve '{}' to {}", curve.name(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn default_curves() -> Vec<FanCurve> {
    vec![
        curve::default_curve(),
        curve::default_silent_curve(),
        curve::default_performance_curve(),
    ]
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_true() -> bool {
    true
}
