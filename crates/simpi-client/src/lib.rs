//! simpi-client library crate.
//!
//! A terminal control panel for the SimPi GPIO simulator.  It keeps a local
//! [`RegisterBank`](simpi_core::RegisterBank) in step with the SimPi broker:
//! the panel's own registers (the button inputs) are pushed, everything the
//! program under test drives (LEDs, PWM, interrupt state) is pulled.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! stdin commands                         SimPi broker
//!       |                                (HTTP :32000, WebSocket :32001)
//!       v                                      ^
//! [simpi-client]                               |
//!   ├── domain/           ClientConfig, BoardLayout, session state
//!   ├── application/      SyncScheduler, Transport + RemoteControl ports
//!   └── infrastructure/
//!         ├── http_transport/  reqwest polling, actions, /api/prefs
//!         ├── ws_transport/    tokio-tungstenite socket
//!         ├── storage/         TOML config file
//!         └── console/         command parser, LED observer
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and `simpi-core`, and reaches the
//!   network only through the [`Transport`](application::Transport) and
//!   [`RemoteControl`](application::RemoteControl) traits.
//! - `infrastructure` implements those traits.

/// Domain layer: pure configuration and session types (no I/O).
pub mod domain;

/// Application layer: the sync scheduler and its ports.
pub mod application;

/// Infrastructure layer: transports, config file, terminal surface.
pub mod infrastructure;
