//! Runtime configuration types.
//!
//! [`ClientConfig`] is the single source of truth for runtime settings once
//! the config file and the command line have been merged.  It is plain data:
//! reading files and environment variables is the infrastructure layer's job.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simpi_core::{HexParsing, ProtocolProfile};

use crate::domain::board::BoardLayout;

/// Default sync period, matching the broker's stock preferences.
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// Which transport carries the periodic register exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One HTTP request per register group per tick.
    #[default]
    Http,
    /// A persistent socket carrying slash-dialect frames.
    Websocket,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "websocket" | "ws" => Ok(TransportKind::Websocket),
            other => Err(format!("unknown transport {other:?} (expected http or websocket)")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Http => "http",
            TransportKind::Websocket => "websocket",
        })
    }
}

/// Settings the [`SyncScheduler`](crate::application::SyncScheduler) runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Tick period.  Must be non-zero.
    pub interval: Duration,
    /// Registers the panel owns and pushes with `setreg`; the rest are pulled.
    pub authoritative: Vec<String>,
    /// Protocol generation of the broker.
    pub profile: ProtocolProfile,
    /// How inbound register values are parsed.
    pub hex_parsing: HexParsing,
    /// `input` pins pushed with `setpin` under the pin-level API.
    pub input_pins: Vec<u8>,
    /// `output` pins pulled with `getpin` under the pin-level API.
    pub output_pins: Vec<u8>,
}

impl Default for SyncConfig {
    /// | Field           | Default       |
    /// |-----------------|---------------|
    /// | interval        | 100 ms        |
    /// | authoritative   | `["input"]`   |
    /// | profile         | `SUCC`, line  |
    /// | hex_parsing     | permissive    |
    /// | input_pins      | board buttons |
    /// | output_pins     | board LEDs    |
    fn default() -> Self {
        let board = BoardLayout::default();
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            authoritative: vec!["input".to_string()],
            profile: ProtocolProfile::default(),
            hex_parsing: HexParsing::Permissive,
            input_pins: board.button_pins(),
            output_pins: board.led_pins(),
        }
    }
}

/// All runtime configuration for the control panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the broker's HTTP API, without the `/api` suffix.
    pub http_base: String,
    /// URL of the broker's socket endpoint.
    pub ws_url: String,
    /// Per-request timeout for HTTP calls and the socket handshake.
    pub request_timeout: Duration,
    pub transport: TransportKind,
    pub sync: SyncConfig,
    pub board: BoardLayout,
    /// Seed the tick period from the broker's `/api/prefs` at startup.
    pub use_broker_prefs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_base: "http://127.0.0.1:32000".to_string(),
            ws_url: "ws://127.0.0.1:32001".to_string(),
            request_timeout: Duration::from_millis(1000),
            transport: TransportKind::Http,
            sync: SyncConfig::default(),
            board: BoardLayout::default(),
            use_broker_prefs: false,
        }
    }
}

/// The subset of the broker's preference document the client reads.
///
/// Unknown keys are ignored so UI-only preferences do not break parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BrokerPrefs {
    #[serde(rename = "sync__update_timeout_ms", default)]
    pub update_timeout_ms: Option<u64>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
