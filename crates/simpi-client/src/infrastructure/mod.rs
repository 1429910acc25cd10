//! Infrastructure layer for simpi-client.
//!
//! Everything that touches the outside world lives here.
//!
//! # Responsibilities
//!
//! - Polling the broker's HTTP API (`reqwest`)
//! - Holding the broker's WebSocket open and reconnecting it
//! - Reading and writing the TOML config file
//! - The stdin control surface and LED logging
//!
//! # What does NOT belong here?
//!
//! - Tick scheduling and session state (that is the application layer)
//! - Register semantics and wire framing (that is `simpi-core`)

pub mod console;
pub mod http_transport;
pub mod storage;
pub mod ws_transport;

pub use http_transport::HttpTransport;
pub use ws_transport::WsTransport;
