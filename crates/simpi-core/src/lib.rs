//! # simpi-core
//!
//! Shared library for the SimPi control panel: the simulated GPIO register
//! model and the text codec used to talk to the SimPi broker.
//!
//! This crate has no networking, no timers and no I/O.  Everything in it is
//! plain data plus pure functions, so the client crate decides how registers
//! are shared and how frames travel.
//!
//! # Architecture overview (for beginners)
//!
//! SimPi simulates a Raspberry Pi's GPIO header.  A broker process holds the
//! authoritative register state seen by the program under test, and a control
//! panel (the client) mirrors that state, showing LEDs and forwarding button
//! presses.  The two exchange register values as small text frames.
//!
//! - **`domain`** – The [`Register`] and the [`RegisterBank`] holding every
//!   register of the board, keyed by name (`input`, `output`, `config`, ...).
//!
//! - **`protocol`** – [`TransferFrame`] plus the two wire dialects: the
//!   single-frame slash form (`getreg:SUCC/output=0x00000001`) and the
//!   multi-frame line form (`>SUCC;output;0x00000001`).

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `simpi_core::RegisterBank` instead of `simpi_core::domain::bank::RegisterBank`.
pub use domain::bank::{RegisterBank, SIMPI_REGISTERS};
pub use domain::register::{
    format_hex, parse_hex, HexParsing, PinRange, Register, RegisterError, RegisterEvent,
    RegisterObserver, DEFAULT_MAX_PIN, DEFAULT_MIN_PIN, REGISTER_WIDTH,
};
pub use protocol::codec::{
    decode_lines, decode_slash, encode_line, encode_slash, request_path, Dialect, ProtocolError,
};
pub use protocol::frame::{ApiLevel, Command, ProtocolProfile, SuccessToken, TransferFrame};
