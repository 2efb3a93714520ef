//! TOML configuration for the chardev-mux binary.
//!
//! Read from the platform-appropriate config file unless a path is given:
//! - Windows:  `%APPDATA%\ChardevMux\config.toml`
//! - Linux:    `~/.config/chardev-mux/config.toml`
//! - macOS:    `~/Library/Application Support/ChardevMux/config.toml`
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [io]
//! read_chunk_limit = 10
//! transient_retry_limit = 10
//! retry_yield_us = 100
//! read_buf_len = 4096
//!
//! [[chardevs]]
//! label = "serial0"
//! kind = "memory"
//! mux = true
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, so a partial file (or no
//! file at all) still yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::chardev::ReadPolicy;
use crate::infrastructure::backends::BackendKind;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub chardevs: Vec<ChardevEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Bounds for the synchronous read / blocking write loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IoConfig {
    /// Successful chunks one `read_all` accepts.
    #[serde(default = "default_read_chunk_limit")]
    pub read_chunk_limit: u32,
    /// Transient retries one `read_all` / `write_all` allows.
    #[serde(default = "default_transient_retry_limit")]
    pub transient_retry_limit: u32,
    /// Pause between transient retries, in microseconds.
    #[serde(default = "default_retry_yield_us")]
    pub retry_yield_us: u64,
    /// Most bytes pulled per readiness event.
    #[serde(default = "default_read_buf_len")]
    pub read_buf_len: usize,
}

/// One chardev to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChardevEntry {
    pub label: String,
    #[serde(default)]
    pub kind: BackendKind,
    /// Also create `"{label}-mux"` on top of this chardev.
    #[serde(default)]
    pub mux: bool,
}

impl ChardevEntry {
    /// Label of the mux created for this entry.
    pub fn mux_label(&self) -> String {
        format!("{}-mux", self.label)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_read_chunk_limit() -> u32 {
    10
}
fn default_transient_retry_limit() -> u32 {
    10
}
fn default_retry_yield_us() -> u64 {
    100
}
fn default_read_buf_len() -> usize {
    4096
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_chunk_limit: default_read_chunk_limit(),
            transient_retry_limit: default_transient_retry_limit(),
            retry_yield_us: default_retry_yield_us(),
            read_buf_len: default_read_buf_len(),
        }
    }
}

impl From<&IoConfig> for ReadPolicy {
    fn from(io: &IoConfig) -> Self {
        Self {
            chunk_limit: io.read_chunk_limit,
            transient_retry_limit: io.transient_retry_limit,
            retry_yield: Duration::from_micros(io.retry_yield_us),
            read_buf_len: io.read_buf_len.max(1),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ChardevMux"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("chardev-mux"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ChardevMux")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
