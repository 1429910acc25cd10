//! HTTP polling transport for the SimPi broker's `/api/` endpoints.
//!
//! Each tick becomes at most two requests:
//!
//! ```text
//! GET /api/setreg/input=0x00400000          push the panel's registers
//! GET /api/getreg/output;config;pwm;...     pull everything else
//! ```
//!
//! With the pin-level profile the same tick drives single board pins:
//!
//! ```text
//! GET /api/setpin/22=1;27=0;17=0            push the button levels
//! GET /api/getpin/18;23;24;25               pull the LED levels
//! ```
//!
//! A line-dialect broker answers a batched request with one `>` line per
//! register.  A slash-dialect broker carries one frame per message, so each
//! frame then gets a request of its own.
//!
//! The same transport serves remote actions (`/api/action/<name>`) and the
//! broker's preference document (`/api/prefs`).

use std::time::Duration;

use async_trait::async_trait;
use simpi_core::{request_path, Command, Dialect, ProtocolProfile, TransferFrame};
use tracing::debug;

use crate::application::{ControlError, RemoteControl, Transport, TransportError};
use crate::domain::{BrokerPrefs, RemoteAction};

/// Writes go out before reads so a pull reflects this tick's push.
const EXCHANGE_ORDER: [Command; 4] = [
    Command::SetReg,
    Command::SetPin,
    Command::GetReg,
    Command::GetPin,
];

/// Talks to the broker over plain HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    profile: ProtocolProfile,
}

impl HttpTransport {
    /// Creates a transport for the broker at `base_url` (for example
    /// `http://127.0.0.1:32000`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        profile: ProtocolProfile,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            profile,
        })
    }

    /// Full URL of an API path such as `getreg/output`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base, path)
    }

    /// Reads the broker's preference document.
    pub async fn fetch_prefs(&self) -> Result<BrokerPrefs, TransportError> {
        let body = self.get_text("prefs").await?;
        serde_json::from_str(&body).map_err(|e| TransportError::InvalidPrefs(e.to_string()))
    }

    async fn request(
        &self,
        command: Command,
        frames: &[TransferFrame],
    ) -> Result<Vec<TransferFrame>, TransportError> {
        match self.profile.response_dialect {
            Dialect::Line => {
                let body = self.get_text(&request_path(command, frames)).await?;
                Ok(self.profile.decode_response(&body)?)
            }
            Dialect::Slash => {
                let mut inbound = Vec::with_capacity(frames.len());
                for frame in frames {
                    let path = request_path(command, std::slice::from_ref(frame));
                    let body = self.get_text(&path).await?;
                    inbound.extend(self.profile.decode_response(&body)?);
                }
                Ok(inbound)
            }
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, TransportError> {
        let url = self.api_url(path);
        debug!("GET {url}");
        let response = self.client.get(&url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response.text().await.map_err(classify)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, frames: &[TransferFrame]) -> Result<Vec<TransferFrame>, TransportError> {
        let mut inbound = Vec::new();
        for command in EXCHANGE_ORDER {
            let group: Vec<TransferFrame> = frames
                .iter()
                .filter(|f| f.command == Some(command))
                .map(|f| match command {
                    // Reads over HTTP name keys only; the last known value is not sent.
                    Command::GetReg | Command::GetPin => {
                        TransferFrame::request(command, f.key.clone(), None)
                    }
                    _ => f.clone(),
                })
                .collect();
            if !group.is_empty() {
                inbound.extend(self.request(command, &group).await?);
            }
        }
        Ok(inbound)
    }
}

#[async_trait]
impl RemoteControl for HttpTransport {
    async fn action(&self, action: RemoteAction) -> Result<String, ControlError> {
        let frames = self
            .request(Command::Action, &[TransferFrame::action(action.as_str())])
            .await
            .map_err(|source| ControlError::Transport { action, source })?;
        acknowledgement(&self.profile, action, &frames)
    }
}

/// Interprets the first frame of an action response.
fn acknowledgement(
    profile: &ProtocolProfile,
    action: RemoteAction,
    frames: &[TransferFrame],
) -> Result<String, ControlError> {
    let frame = frames
        .first()
        .ok_or(ControlError::NoAcknowledgement(action))?;
    if profile.is_success(frame) {
        return Ok(frame.value.clone().unwrap_or_default());
    }
    let reason = frame
        .failure_reason()
        .or(frame.status.as_deref())
        .unwrap_or("no status")
        .to_string();
    Err(ControlError::Rejected { action, reason })
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
