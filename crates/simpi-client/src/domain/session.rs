//! Sync session state and the events the scheduler publishes.
//!
//! Run state is user-driven (play/pause), connection state is
//! transport-driven.  The two are independent: a running session can be
//! disconnected, and a paused session keeps the last known connection state.

use std::fmt;

/// Transport-driven connectivity of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// A reconnect attempt is in flight.
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "off",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "on",
        })
    }
}

/// User-driven run state of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Paused,
    Running,
}

/// Control actions the broker accepts on `/api/action/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    Reset,
    Terminate,
}

impl RemoteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteAction::Reset => "reset",
            RemoteAction::Terminate => "terminate",
        }
    }
}

impl fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status changes published by the scheduler for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The connection indicator changed.
    ConnectionChanged(ConnectionState),
    /// The broker acknowledged an action; `message` is its free-form reply.
    ActionCompleted {
        action: RemoteAction,
        message: String,
    },
    /// An action got no acknowledgement or a negative one.
    ActionFailed { action: RemoteAction, reason: String },
    /// The broker shut down on request; the session is over.
    Terminated,
}
