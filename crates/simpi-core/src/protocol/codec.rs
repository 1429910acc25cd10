//! Text codec for the SimPi transfer protocol.
//!
//! Two broker generations frame messages differently, and both are still in
//! use.  Each is a [`Dialect`] with its own pure encode/decode functions:
//!
//! ```text
//! Slash dialect, one frame per message:
//!     <command>[:<status>]/<key>[=<value>]
//!     getreg:SUCC/output=0x00FF0000
//!
//! Line dialect, any number of frames per message:
//!     op:getreg                       optional header, sets the command
//!     >SUCC;output;0x00FF0000         '>' status ';' key ';' value
//!     >FAIL~UNKREG;bogus;0x00000000
//! ```
//!
//! The slash dialect has no recovery path, so any arity error fails the whole
//! message.  The line dialect skips lines it cannot use, because transports
//! interleave log noise with the frames.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::frame::{Command, TransferFrame};

const SLASH_SHAPE: &str = "<command>[:<status>]/<key>[=<value>]";

/// Errors raised while decoding or encoding frames.
///
/// Every decode error keeps the offending raw text for diagnostics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message does not have the field count the dialect requires.
    #[error("malformed frame {raw:?}: expected {expected}")]
    Arity { expected: &'static str, raw: String },

    /// The command field names no known command.
    #[error("unknown command {command:?} in frame {raw:?}")]
    UnknownCommand { command: String, raw: String },

    /// The key field is empty.
    #[error("frame {raw:?} has an empty key")]
    EmptyKey { raw: String },

    /// More than one frame was handed to the slash dialect.
    #[error("the slash dialect carries one frame per message, got {0}")]
    BatchNotSupported(usize),
}

impl ProtocolError {
    /// The raw text that failed to decode, if this is a decode error.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ProtocolError::Arity { raw, .. }
            | ProtocolError::UnknownCommand { raw, .. }
            | ProtocolError::EmptyKey { raw } => Some(raw),
            ProtocolError::BatchNotSupported(_) => None,
        }
    }
}

/// A wire framing generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `<command>:<status>/<key>=<value>`, one frame per message.
    Slash,
    /// `>status;key;value` lines, optionally headed by `op:<command>`.
    #[default]
    Line,
}

impl Dialect {
    /// Encodes a single frame.
    pub fn encode(self, frame: &TransferFrame) -> String {
        match self {
            Dialect::Slash => encode_slash(frame),
            Dialect::Line => encode_line(frame),
        }
    }

    /// Encodes several frames as one message.
    ///
    /// The line dialect emits an `op:` header when all frames share a
    /// command, then one line per frame.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::BatchNotSupported`] for more than one frame in the
    /// slash dialect.
    pub fn encode_batch(self, frames: &[TransferFrame]) -> Result<String, ProtocolError> {
        match self {
            Dialect::Slash => match frames {
                [] => Ok(String::new()),
                [frame] => Ok(encode_slash(frame)),
                _ => Err(ProtocolError::BatchNotSupported(frames.len())),
            },
            Dialect::Line => Ok(encode_lines(frames)),
        }
    }

    /// Decodes zero or more frames from one message.
    ///
    /// Leading and trailing whitespace is ignored.  Only the slash dialect
    /// can fail.
    pub fn decode(self, raw: &str) -> Result<Vec<TransferFrame>, ProtocolError> {
        match self {
            Dialect::Slash => Ok(decode_slash(raw)?.into_iter().collect()),
            Dialect::Line => Ok(decode_lines(raw)),
        }
    }
}

// ── Slash dialect ─────────────────────────────────────────────────────────────

/// Encodes one frame in the slash dialect.
///
/// ```rust
/// use simpi_core::{encode_slash, TransferFrame};
///
/// let frame = TransferFrame::set_register("input", 0x4);
/// assert_eq!(encode_slash(&frame), "setreg/input=0x00000004");
/// ```
pub fn encode_slash(frame: &TransferFrame) -> String {
    let mut out = String::new();
    if let Some(command) = frame.command {
        out.push_str(command.as_str());
    }
    if let Some(status) = &frame.status {
        out.push(':');
        out.push_str(status);
    }
    out.push('/');
    out.push_str(&frame.key);
    if let Some(value) = &frame.value {
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Decodes one slash-dialect message.  Blank input yields `Ok(None)`.
///
/// # Errors
///
/// - [`ProtocolError::Arity`] unless there is exactly one `/`, at most one
///   `:` before it and at most one `=` after it.
/// - [`ProtocolError::UnknownCommand`] for an unrecognised command.
/// - [`ProtocolError::EmptyKey`] when the key is empty.
pub fn decode_slash(raw: &str) -> Result<Option<TransferFrame>, ProtocolError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let arity = || ProtocolError::Arity {
        expected: SLASH_SHAPE,
        raw: raw.to_string(),
    };

    let parts: Vec<&str> = text.split('/').collect();
    let [head, tail] = parts.as_slice() else {
        return Err(arity());
    };

    let (command, status) = match head.split(':').collect::<Vec<_>>().as_slice() {
        [command] => (*command, None),
        [command, status] => (*command, non_empty(status)),
        _ => return Err(arity()),
    };
    let (key, value) = match tail.split('=').collect::<Vec<_>>().as_slice() {
        [key] => (*key, None),
        [key, value] => (*key, non_empty(value)),
        _ => return Err(arity()),
    };

    let command = Command::parse(command).ok_or_else(|| ProtocolError::UnknownCommand {
        command: command.to_string(),
        raw: raw.to_string(),
    })?;
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey {
            raw: raw.to_string(),
        });
    }

    Ok(Some(TransferFrame {
        command: Some(command),
        status,
        key: key.to_string(),
        value,
    }))
}

// ── Line dialect ──────────────────────────────────────────────────────────────

/// Encodes one frame as a single line (no header, no trailing newline).
pub fn encode_line(frame: &TransferFrame) -> String {
    format!(
        ">{};{};{}",
        frame.status.as_deref().unwrap_or_default(),
        frame.key,
        frame.value.as_deref().unwrap_or_default()
    )
}

fn encode_lines(frames: &[TransferFrame]) -> String {
    let mut out = String::new();
    if let Some(first) = frames.first() {
        if let Some(command) = first.command {
            if frames.iter().all(|f| f.command == Some(command)) {
                out.push_str("op:");
                out.push_str(command.as_str());
                out.push('\n');
            }
        }
    }
    for frame in frames {
        out.push_str(&encode_line(frame));
        out.push('\n');
    }
    out
}

/// Decodes every usable line of a line-dialect message.
///
/// Lines that do not start with `>` are not frames and are skipped, as are
/// frame lines with fewer than three fields.  An `op:<command>` line sets
/// the command of the frames after it.
pub fn decode_lines(raw: &str) -> Vec<TransferFrame> {
    let mut command = None;
    let mut frames = Vec::new();

    for line in raw.lines().map(str::trim) {
        if let Some(op) = line.strip_prefix("op:") {
            command = Command::parse(op.trim());
            continue;
        }
        let Some(body) = line.strip_prefix('>') else {
            if !line.is_empty() {
                debug!("skipping non-frame line {line:?}");
            }
            continue;
        };
        let fields: Vec<&str> = body.splitn(3, ';').collect();
        let [status, key, value] = fields.as_slice() else {
            debug!("skipping frame line with {} field(s): {line:?}", fields.len());
            continue;
        };
        frames.push(TransferFrame {
            command,
            status: non_empty(status),
            key: key.to_string(),
            value: non_empty(value),
        });
    }

    frames
}

// ── HTTP request paths ────────────────────────────────────────────────────────

/// Builds the `/api/` path segment for a batched request:
/// `<command>/<key>[=<value>];<key>[=<value>]...`.
///
/// ```rust
/// use simpi_core::{request_path, Command, TransferFrame};
///
/// let frames = [
///     TransferFrame::get_register("output", None),
///     TransferFrame::get_register("config", None),
/// ];
/// assert_eq!(request_path(Command::GetReg, &frames), "getreg/output;config");
/// ```
pub fn request_path(command: Command, frames: &[TransferFrame]) -> String {
    let items: Vec<String> = frames
        .iter()
        .map(|frame| match &frame.value {
            Some(value) => format!("{}={}", frame.key, value),
            None => frame.key.clone(),
        })
        .collect();
    format!("{}/{}", command.as_str(), items.join(";"))
}

fn non_empty(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
