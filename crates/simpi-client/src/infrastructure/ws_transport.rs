//! Persistent WebSocket transport.
//!
//! The socket carries one slash-dialect frame per text message in each
//! direction:
//!
//! ```text
//! panel  -> broker   setreg/input=0x00400000
//! panel  -> broker   getreg/output=0x00000000
//! broker -> panel    getreg:SUCC/output=0x00040000
//! ```
//!
//! Replies are not matched to requests.  A background reader task decodes
//! every inbound text message as it arrives and forwards the frames on the
//! channel handed out by [`Transport::take_inbound`], so a reply reaches the
//! bank as soon as it is read, even after the panel has paused.
//! [`exchange`](Transport::exchange) only sends.
//!
//! # Reconnecting (for beginners)
//!
//! The reader task clears the `open` flag when the broker closes the socket
//! or the stream fails.  The scheduler sees [`Transport::needs_reconnect`]
//! and calls [`Transport::reconnect`] once; ticks that fire while that is in
//! flight are skipped rather than queued behind it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use simpi_core::{encode_slash, ProtocolProfile, TransferFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message as WsMessage,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::application::{Transport, TransportError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Talks to the broker over a single long-lived WebSocket.
pub struct WsTransport {
    url: String,
    profile: ProtocolProfile,
    connect_timeout: Duration,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    inbound_tx: mpsc::UnboundedSender<Vec<TransferFrame>>,
    /// Taken once by the consumer of inbound frames.
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<TransferFrame>>>>,
    open: Arc<AtomicBool>,
    /// Identifies the live connection so a stale reader cannot clear `open`.
    connection_id: Arc<AtomicU64>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Creates an unconnected transport.  Call [`connect`](Self::connect)
    /// before the first tick, or let the scheduler reconnect it.
    pub fn new(url: impl Into<String>, profile: ProtocolProfile, connect_timeout: Duration) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            profile,
            connect_timeout,
            sink: tokio::sync::Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            open: Arc::new(AtomicBool::new(false)),
            connection_id: Arc::new(AtomicU64::new(0)),
            reader: Mutex::new(None),
        }
    }

    /// `true` while the socket is believed to be open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Opens the socket and starts the reader task.  Any previous connection
    /// is dropped.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake takes longer than the
    ///   configured timeout.
    /// - [`TransportError::Connect`] if the connection or handshake fails.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, mut source) = stream.split();

        let id = self.connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        *self.sink.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        let inbound = self.inbound_tx.clone();
        let profile = self.profile;
        let open = Arc::clone(&self.open);
        let connection_id = Arc::clone(&self.connection_id);
        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let frames = decode_message(&profile, &text);
                        // Nobody is listening once the scheduler is gone.
                        if !frames.is_empty() && inbound.send(frames).is_err() {
                            debug!("no consumer for inbound socket frames");
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        debug!("broker closed socket: {frame:?}");
                        break;
                    }
                    // Pings are answered by tungstenite; binary is not part of the protocol.
                    Ok(_) => {}
                    Err(e) => {
                        warn!("socket read error: {e}");
                        break;
                    }
                }
            }
            if connection_id.load(Ordering::SeqCst) == id {
                open.store(false, Ordering::SeqCst);
                info!("socket to {url} closed");
            }
        });

        if let Some(previous) = lock(&self.reader).replace(reader) {
            previous.abort();
        }
        info!("connected to broker socket at {}", self.url);
        Ok(())
    }
}

/// Decodes one socket message, dropping it whole if it is malformed.
fn decode_message(profile: &ProtocolProfile, text: &str) -> Vec<TransferFrame> {
    match profile.decode_response(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("dropping malformed socket message: {e}");
            Vec::new()
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn exchange(&self, frames: &[TransferFrame]) -> Result<Vec<TransferFrame>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::Closed)?;
        for frame in frames {
            if let Err(e) = sink.send(WsMessage::Text(encode_slash(frame))).await {
                warn!("socket send failed: {e}");
                self.open.store(false, Ordering::SeqCst);
                *guard = None;
                return Err(TransportError::Closed);
            }
        }
        Ok(Vec::new())
    }

    fn needs_reconnect(&self) -> bool {
        !self.is_open()
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.connect().await
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Vec<TransferFrame>>> {
        lock(&self.inbound_rx).take()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
