//! Domain layer for simpi-client.
//!
//! Pure types with no I/O: runtime configuration, the board wiring and the
//! session state the scheduler reports.  The register model itself lives in
//! `simpi-core`.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `reqwest` or WebSocket types
//! - File I/O or environment variable reading

pub mod board;
pub mod config;
pub mod session;

// Re-export the most commonly needed types at the domain module boundary
// so callers can write `domain::ClientConfig` instead of the longer path.
pub use board::{BoardError, BoardLayout, BUTTON_REGISTER, LED_REGISTER};
pub use config::{BrokerPrefs, ClientConfig, SyncConfig, TransportKind, DEFAULT_INTERVAL_MS};
pub use session::{ConnectionState, RemoteAction, RunState, SyncEvent};
