//! Application layer for simpi-client.
//!
//! The application layer knows *what* a sync session does (tick, apply,
//! reset, terminate) and delegates *how* frames travel to the ports in
//! [`transport`], which the infrastructure layer implements.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or building HTTP requests (that is infrastructure)
//! - Reading config files or the command line

pub mod sync_scheduler;
pub mod transport;

pub use sync_scheduler::{lock_bank, SharedBank, SyncError, SyncScheduler};
pub use transport::{ControlError, RemoteControl, Transport, TransportError};
