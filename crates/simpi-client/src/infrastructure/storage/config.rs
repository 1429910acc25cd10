//! TOML configuration file for the control panel.
//!
//! The file lives in the platform-appropriate config directory unless
//! `--config` names another one:
//! - Windows:  `%APPDATA%\SimPi\client.toml`
//! - Linux:    `~/.config/simpi/client.toml`
//! - macOS:    `~/Library/Application Support/SimPi/client.toml`
//!
//! Every field is optional.  A missing file or section means the defaults,
//! so a fresh checkout runs against a local broker with no setup:
//!
//! ```toml
//! log_level = "info"
//!
//! [broker]
//! http_base = "http://127.0.0.1:32000"
//! ws_url = "ws://127.0.0.1:32001"
//! request_timeout_ms = 1000
//!
//! [sync]
//! transport = "http"
//! interval_ms = 100
//! authoritative = ["input"]
//! hex_parsing = "permissive"
//! use_broker_prefs = false
//!
//! [protocol]
//! success_token = "SUCC"
//! response_dialect = "line"
//! api = "register"          # "pin" drives the board's LEDs and buttons only
//!
//! [board.leds]
//! LED1 = 18
//!
//! [board.buttons]
//! BTN1 = 22
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simpi_core::{HexParsing, ProtocolProfile};
use thiserror::Error;

use crate::domain::{BoardLayout, ClientConfig, SyncConfig, TransportKind, DEFAULT_INTERVAL_MS};

const CONFIG_FILE_NAME: &str = "client.toml";

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

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub protocol: ProtocolProfile,
    #[serde(default)]
    pub board: BoardLayout,
}

/// Where the broker listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerSection {
    #[serde(default = "default_http_base")]
    pub http_base: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// How the register bank is kept in sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSection {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_authoritative")]
    pub authoritative: Vec<String>,
    #[serde(default)]
    pub hex_parsing: HexParsing,
    #[serde(default)]
    pub use_broker_prefs: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_http_base() -> String {
    "http://127.0.0.1:32000".to_string()
}
fn default_ws_url() -> String {
    "ws://127.0.0.1:32001".to_string()
}
fn default_request_timeout_ms() -> u64 {
    1000
}
fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}
fn default_authoritative() -> Vec<String> {
    vec!["input".to_string()]
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            broker: BrokerSection::default(),
            sync: SyncSection::default(),
            protocol: ProtocolProfile::default(),
            board: BoardLayout::default(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            http_base: default_http_base(),
            ws_url: default_ws_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            interval_ms: default_interval_ms(),
            authoritative: default_authoritative(),
            hex_parsing: HexParsing::default(),
            use_broker_prefs: false,
        }
    }
}

impl FileConfig {
    /// Converts the on-disk schema into the runtime configuration.
    ///
    /// An `interval_ms` of zero is passed through; the scheduler rejects it.
    pub fn into_client_config(self) -> ClientConfig {
        ClientConfig {
            http_base: self.broker.http_base,
            ws_url: self.broker.ws_url,
            request_timeout: Duration::from_millis(self.broker.request_timeout_ms),
            transport: self.sync.transport,
            sync: SyncConfig {
                interval: Duration::from_millis(self.sync.interval_ms),
                authoritative: self.sync.authoritative,
                profile: self.protocol,
                hex_parsing: self.sync.hex_parsing,
                input_pins: self.board.button_pins(),
                output_pins: self.board.led_pins(),
            },
            board: self.board,
            use_broker_prefs: self.sync.use_broker_prefs,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads the config from `path`, returning [`FileConfig::default()`] if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &FileConfig, path: &Path) -> Result<(), ConfigError> {
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
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SimPi"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("simpi"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("SimPi"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
