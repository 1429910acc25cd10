//! Ports the sync scheduler drives: the register transport and the broker's
//! remote-control endpoint.
//!
//! Infrastructure implementations speak HTTP or WebSocket; test
//! implementations record calls.

use async_trait::async_trait;
use simpi_core::{ProtocolError, TransferFrame};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::RemoteAction;

/// Failures while moving frames to or from the broker.
///
/// All of these are expected under an unattended polling loop.  The
/// scheduler turns them into a connection-state change, never into an error
/// for its caller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or its body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The broker answered with a non-success HTTP status.
    #[error("broker answered with HTTP status {0}")]
    Status(u16),

    /// The connection was refused or the handshake failed.
    #[error("could not connect to broker: {0}")]
    Connect(String),

    /// The request or handshake did not finish in time.
    #[error("broker request timed out")]
    Timeout,

    /// The persistent socket is closed.
    #[error("socket to broker is closed")]
    Closed,

    /// The broker's response could not be decoded.
    #[error("broker sent a malformed response: {0}")]
    Protocol(#[from] ProtocolError),

    /// The preference document is not the JSON object the broker serves.
    #[error("broker sent an invalid preference document: {0}")]
    InvalidPrefs(String),
}

/// A remote action that was not acknowledged.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{action} request failed: {source}")]
    Transport {
        action: RemoteAction,
        #[source]
        source: TransportError,
    },

    #[error("broker rejected {action}: {reason}")]
    Rejected { action: RemoteAction, reason: String },

    #[error("broker sent no acknowledgement for {0}")]
    NoAcknowledgement(RemoteAction),
}

impl ControlError {
    /// `true` when the broker could not be reached at all, as opposed to a
    /// broker that answered negatively.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlError::Transport { .. })
    }
}

/// Moves one tick's worth of frames to the broker and returns what came back.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `frames` and returns every inbound frame received in reply.
    ///
    /// Transports that deliver replies through [`Transport::take_inbound`]
    /// return an empty list.
    async fn exchange(&self, frames: &[TransferFrame]) -> Result<Vec<TransferFrame>, TransportError>;

    /// `true` when a persistent connection has dropped and must be rebuilt
    /// before the next exchange.  Connectionless transports never need one.
    fn needs_reconnect(&self) -> bool {
        false
    }

    /// Re-establishes the connection.
    async fn reconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// The receiving end for frames that arrive outside any exchange, one
    /// batch per broker message.  Handed out once; later calls and
    /// request/response transports return `None`.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Vec<TransferFrame>>> {
        None
    }
}

/// Sends control actions to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteControl: Send + Sync {
    /// Requests `action` and returns the broker's acknowledgement message.
    async fn action(&self, action: RemoteAction) -> Result<String, ControlError>;
}
