//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::bindings::{Binding, BuiltinShortcuts, ShortcutKey};
use crate::state::{Timing, DEFAULT_REBUILD_DEBOUNCE, DEFAULT_TRIGGER_WINDOW};

const DEFAULT_WINDOW_REFRESH: Duration = Duration::from_secs(2);
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Errors in environment-provided settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HOME is not set")]
    MissingHome,

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid key code {0:?}")]
    InvalidKeyCode(String),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Bindings read at startup, if present
    pub bindings_path: PathBuf,

    /// Hold threshold and multi-press window
    pub timing: Timing,

    pub rebuild_debounce: Duration,

    pub window_refresh: Duration,

    /// Delay before re-installing a tap the system disabled
    pub restart_delay: Duration,

    /// Focus a specific window when the target app is on another space
    pub focus_across_spaces: bool,

    pub builtins: BuiltinShortcuts,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
            .context("failed to load configuration from environment")
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").ok_or(ConfigError::MissingHome)?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("warpkey");

        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidValue { key, value }),
            }
        };

        let timing = Timing {
            hold_threshold: millis("WARPKEY_HOLD_MS", DEFAULT_TRIGGER_WINDOW)?,
            multi_press_window: millis("WARPKEY_MULTI_PRESS_MS", DEFAULT_TRIGGER_WINDOW)?,
        };

        let focus_across_spaces = match lookup("WARPKEY_FOCUS_ACROSS_SPACES") {
            None => true,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue {
                key: "WARPKEY_FOCUS_ACROSS_SPACES",
                value,
            })?,
        };

        let builtins = BuiltinShortcuts {
            cheatsheet: lookup("WARPKEY_CHEATSHEET_KEYS")
                .map(|v| parse_keys(&v))
                .transpose()?
                .filter(|keys| !keys.is_empty()),
            quick_assign: lookup("WARPKEY_QUICK_ASSIGN_KEYS")
                .map(|v| parse_keys(&v))
                .transpose()?
                .filter(|keys| !keys.is_empty()),
        };

        Ok(Self {
            socket_path: data_dir.join("daemon.sock"),
            bindings_path: data_dir.join("bindings.json"),
            data_dir,
            timing,
            rebuild_debounce: millis("WARPKEY_REBUILD_DEBOUNCE_MS", DEFAULT_REBUILD_DEBOUNCE)?,
            window_refresh: millis("WARPKEY_WINDOW_REFRESH_MS", DEFAULT_WINDOW_REFRESH)?,
            restart_delay: millis("WARPKEY_RESTART_DELAY_MS", DEFAULT_RESTART_DELAY)?,
            focus_across_spaces,
            builtins,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Read the bindings file; a missing file means no bindings
    pub fn load_bindings(&self) -> Result<Vec<Binding>> {
        if !self.bindings_path.exists() {
            debug!(path = %self.bindings_path.display(), "no bindings file");
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.bindings_path)
            .with_context(|| format!("failed to read {}", self.bindings_path.display()))?;
        let bindings = serde_json::from_str(&raw)
            .with_context(|| format!("invalid bindings in {}", self.bindings_path.display()))?;
        Ok(bindings)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `55,0` or `0x37,sys:16` into shortcut keys
fn parse_keys(value: &str) -> Result<Vec<ShortcutKey>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix("sys:") {
            Some(code) => parse_code(code).map(ShortcutKey::system),
            None => parse_code(part).map(ShortcutKey::normal),
        })
        .collect()
}

fn parse_code(code: &str) -> Result<u16, ConfigError> {
    let code = code.trim();
    let parsed = match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => code.parse(),
    };
    parsed.map_err(|_| ConfigError::InvalidKeyCode(code.to_string()))
}
