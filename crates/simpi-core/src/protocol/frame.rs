//! Transfer frame types and protocol profiles.
//!
//! A [`TransferFrame`] is one decoded unit of the text protocol spoken with
//! the SimPi broker.  Frames are built per message and never stored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::register::format_hex;
use crate::protocol::codec::{Dialect, ProtocolError};

/// Prefix of every failure status (`FAIL~UNKREG`, `FAIL~PNF`, ...).
pub const FAILURE_PREFIX: &str = "FAIL";

// ── Commands ──────────────────────────────────────────────────────────────────

/// The command a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Read single pins of the `output` register (pin-level API).
    GetPin,
    /// Write single pins of the `input` register (pin-level API).
    SetPin,
    /// Read whole registers.
    GetReg,
    /// Write whole registers.
    SetReg,
    /// Broker control action (`reset`, `terminate`).
    Action,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::GetPin => "getpin",
            Command::SetPin => "setpin",
            Command::GetReg => "getreg",
            Command::SetReg => "setreg",
            Command::Action => "action",
        }
    }

    /// Parses a command name, ignoring ASCII case.
    pub fn parse(raw: &str) -> Option<Self> {
        const ALL: [Command; 5] = [
            Command::GetPin,
            Command::SetPin,
            Command::GetReg,
            Command::SetReg,
            Command::Action,
        ];
        ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFrame {
    /// `None` for line-dialect frames that arrive without an `op:` header.
    pub command: Option<Command>,
    /// Outcome tag set by the broker; requests carry none.
    pub status: Option<String>,
    /// Register key, pin number or action name.
    pub key: String,
    /// Hex register value, pin level or free-form action message.
    pub value: Option<String>,
}

impl TransferFrame {
    /// Builds a request frame (no status).
    pub fn request(command: Command, key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            command: Some(command),
            status: None,
            key: key.into(),
            value,
        }
    }

    /// `setreg` request carrying `value` in broker hex format.
    pub fn set_register(key: impl Into<String>, value: u32) -> Self {
        Self::request(Command::SetReg, key, Some(format_hex(value)))
    }

    /// `getreg` request.  `last_known` is sent along when available, as the
    /// socket dialect always carries a value.
    pub fn get_register(key: impl Into<String>, last_known: Option<u32>) -> Self {
        Self::request(Command::GetReg, key, last_known.map(format_hex))
    }

    /// `setpin` request driving one `input` pin to `bit`.
    pub fn set_pin(pin: u8, bit: u8) -> Self {
        Self::request(Command::SetPin, pin.to_string(), Some(bit.to_string()))
    }

    /// `getpin` request for one `output` pin.
    pub fn get_pin(pin: u8) -> Self {
        Self::request(Command::GetPin, pin.to_string(), None)
    }

    /// `action` request for the named broker action.
    pub fn action(name: impl Into<String>) -> Self {
        Self::request(Command::Action, name, None)
    }

    /// Returns the reason part of a `FAIL~<REASON>` status.
    ///
    /// A bare `FAIL` yields an empty reason; any other status yields `None`.
    pub fn failure_reason(&self) -> Option<&str> {
        let rest = self.status.as_deref()?.strip_prefix(FAILURE_PREFIX)?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('~')
        }
    }
}

// ── Protocol profile ──────────────────────────────────────────────────────────

/// The token a broker generation uses to report success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuccessToken {
    /// Current broker: `SUCC`.
    #[default]
    #[serde(rename = "SUCC")]
    Succ,
    /// Early broker generation: `success`.
    #[serde(rename = "success")]
    Success,
}

impl SuccessToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuccessToken::Succ => "SUCC",
            SuccessToken::Success => "success",
        }
    }
}

/// Granularity of the periodic exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiLevel {
    /// Whole registers through `getreg`/`setreg`.
    #[default]
    Register,
    /// Single board pins through `getpin`/`setpin`, as early brokers served.
    Pin,
}

/// The protocol generation spoken by one broker deployment.
///
/// Profiles are picked once per deployment; the client never guesses the
/// dialect of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolProfile {
    /// Status token that means success.
    #[serde(default)]
    pub success_token: SuccessToken,
    /// Framing of broker responses (register dumps and action results).
    #[serde(default)]
    pub response_dialect: Dialect,
    /// Register-level or pin-level exchange.
    #[serde(default)]
    pub api: ApiLevel,
}

impl ProtocolProfile {
    /// Normalizes a frame's status to a boolean.  Missing statuses and
    /// tokens from the other generation count as failure.
    pub fn is_success(&self, frame: &TransferFrame) -> bool {
        frame.status.as_deref() == Some(self.success_token.as_str())
    }

    /// Decodes a broker response with this profile's dialect.
    pub fn decode_response(&self, raw: &str) -> Result<Vec<TransferFrame>, ProtocolError> {
        self.response_dialect.decode(raw)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(status: &str) -> TransferFrame {
        TransferFrame {
            command: None,
            status: Some(status.to_string()),
            key: "output".to_string(),
            value: None,
        }
    }

    #[test]
    fn test_command_parse_ignores_case() {
        assert_eq!(Command::parse("GETREG"), Some(Command::GetReg));
        assert_eq!(Command::parse("action"), Some(Command::Action));
        assert_eq!(Command::parse("setpins"), None);
    }

    #[test]
    fn test_set_register_uses_broker_hex_format() {
        let frame = TransferFrame::set_register("input", 0x0040_0000);
        assert_eq!(frame.command, Some(Command::SetReg));
        assert_eq!(frame.value.as_deref(), Some("0x00400000"));
        assert_eq!(frame.status, None);
    }

    #[test]
    fn test_pin_requests_name_the_gpio_number() {
        let press = TransferFrame::set_pin(22, 1);
        let led = TransferFrame::get_pin(18);

        assert_eq!(press.command, Some(Command::SetPin));
        assert_eq!(press.key, "22");
        assert_eq!(press.value.as_deref(), Some("1"));
        assert_eq!(led.command, Some(Command::GetPin));
        assert_eq!(led.key, "18");
        assert_eq!(led.value, None);
    }

    #[test]
    fn test_profile_api_defaults_to_register_level() {
        // Arrange
        let section = "success_token = \"success\"\napi = \"pin\"\n";

        // Act
        let legacy: ProtocolProfile = toml::from_str(section).unwrap();

        // Assert
        assert_eq!(ProtocolProfile::default().api, ApiLevel::Register);
        assert_eq!(legacy.api, ApiLevel::Pin);
        assert_eq!(legacy.response_dialect, Dialect::Line);
    }

    #[test]
    fn test_failure_reason_extracts_tag() {
        assert_eq!(with_status("FAIL~UNKREG").failure_reason(), Some("UNKREG"));
        assert_eq!(with_status("FAIL").failure_reason(), Some(""));
        assert_eq!(with_status("SUCC").failure_reason(), None);
        assert_eq!(with_status("FAILED").failure_reason(), None);
    }

    #[test]
    fn test_profile_normalizes_its_own_token_only() {
        let current = ProtocolProfile::default();
        let legacy = ProtocolProfile {
            success_token: SuccessToken::Success,
            ..ProtocolProfile::default()
        };

        assert!(current.is_success(&with_status("SUCC")));
        assert!(!current.is_success(&with_status("success")));
        assert!(legacy.is_success(&with_status("success")));
        assert!(!legacy.is_success(&with_status("SUCC")));
        assert!(!current.is_success(&TransferFrame::action("reset")));
    }
}
