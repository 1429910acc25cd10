//! A single simulated 32-bit GPIO register.
//!
//! # Bits and pins (for beginners)
//!
//! The simulated Raspberry Pi exposes its GPIO lines as bits inside 32-bit
//! registers.  Bit `n` of the `output` register is the level driven on GPIO
//! `n`; bit `n` of the `input` register is the level read from GPIO `n`.
//! Only GPIO 2 to 27 are wired on the header, so pin-level access is
//! restricted to that window, while [`Register::bit`] still gives raw access
//! to all 32 bits for rendering a full register row.
//!
//! # Change notifications
//!
//! A register never talks to a display directly.  Every mutation emits a
//! [`RegisterEvent`] to the attached [`RegisterObserver`] (if any), and the
//! presentation layer decides what to redraw.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of addressable bits in a register.
pub const REGISTER_WIDTH: u8 = 32;

/// Lowest GPIO number wired on the simulated header.
pub const DEFAULT_MIN_PIN: u8 = 2;

/// Highest GPIO number wired on the simulated header.
pub const DEFAULT_MAX_PIN: u8 = 27;

/// Errors raised by register and register-bank operations.
///
/// All of these are contract violations by the caller: they are reported
/// immediately and the register is left untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The pin is outside the register's validated pin window.
    #[error("pin {pin} is outside the valid range {min}..={max}")]
    PinOutOfRange { pin: u8, min: u8, max: u8 },

    /// The bit index is outside the 32-bit register width.
    #[error("bit {0} is outside the 32-bit register width")]
    BitOutOfRange(u8),

    /// No register with this key exists in the bank.
    #[error("unknown register: {0:?}")]
    UnknownRegister(String),

    /// Two registers in a bank layout share the same key.
    #[error("duplicate register key: {0:?}")]
    DuplicateRegister(String),

    /// A strict hex parse rejected the input.
    #[error("invalid hex value: {0:?}")]
    InvalidHex(String),

    /// A pin window that is empty or exceeds the register width.
    #[error("invalid pin range {min}..={max}")]
    InvalidPinRange { min: u8, max: u8 },
}

// ── Pin window ────────────────────────────────────────────────────────────────

/// Inclusive range of pin numbers that pin-level operations accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRange {
    pub min: u8,
    pub max: u8,
}

impl PinRange {
    /// The wired GPIO window of the simulated board (2..=27).
    pub const HARDWARE: PinRange = PinRange {
        min: DEFAULT_MIN_PIN,
        max: DEFAULT_MAX_PIN,
    };

    /// Creates a pin window, rejecting empty windows and windows wider than
    /// the register.
    pub fn new(min: u8, max: u8) -> Result<Self, RegisterError> {
        if min > max || max >= REGISTER_WIDTH {
            return Err(RegisterError::InvalidPinRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Returns `true` if `pin` lies inside the window.
    pub fn contains(&self, pin: u8) -> bool {
        (self.min..=self.max).contains(&pin)
    }

    fn check(&self, pin: u8) -> Result<(), RegisterError> {
        if self.contains(pin) {
            Ok(())
        } else {
            Err(RegisterError::PinOutOfRange {
                pin,
                min: self.min,
                max: self.max,
            })
        }
    }
}

impl Default for PinRange {
    fn default() -> Self {
        Self::HARDWARE
    }
}

// ── Hex (de)serialization ─────────────────────────────────────────────────────

/// How register values received as text are parsed.
///
/// `Permissive` reproduces the historical broker/client behaviour: the
/// longest leading run of hex digits is used and input without any hex digit
/// becomes `0`.  This silently turns garbage into a cleared register, so
/// deployments that want to catch broken brokers should select `Strict`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HexParsing {
    #[default]
    Permissive,
    Strict,
}

/// Formats a register value the way the broker does: `0x` followed by eight
/// upper-case hex digits.
///
/// ```rust
/// assert_eq!(simpi_core::format_hex(0x00FF_0000), "0x00FF0000");
/// ```
pub fn format_hex(value: u32) -> String {
    format!("{value:#010X}")
}

/// Parses a register value from text, with or without a `0x`/`0X` prefix.
///
/// # Errors
///
/// Only in [`HexParsing::Strict`] mode: returns
/// [`RegisterError::InvalidHex`] unless the digits form a valid `u32`.
///
/// ```rust
/// use simpi_core::{parse_hex, HexParsing};
///
/// assert_eq!(parse_hex("0x1F", HexParsing::Permissive), Ok(0x1F));
/// assert_eq!(parse_hex("zz", HexParsing::Permissive), Ok(0));
/// assert!(parse_hex("zz", HexParsing::Strict).is_err());
/// ```
pub fn parse_hex(raw: &str, mode: HexParsing) -> Result<u32, RegisterError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    match mode {
        HexParsing::Strict => {
            u32::from_str_radix(digits, 16).map_err(|_| RegisterError::InvalidHex(raw.to_string()))
        }
        HexParsing::Permissive => Ok(digits
            .chars()
            .map_while(|c| c.to_digit(16))
            .fold(0u32, |acc, d| acc.wrapping_mul(16).wrapping_add(d))),
    }
}

// ── Observer ──────────────────────────────────────────────────────────────────

/// A change emitted by a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterEvent {
    /// The whole register value changed (write, hex load or reset).
    RegisterChanged { key: String, value: u32 },
    /// A single pin was written.
    PinChanged { key: String, pin: u8, bit: u8 },
}

/// Receives register change notifications.
///
/// Observers are called synchronously from inside the mutating call, so an
/// implementation must not try to mutate the register bank it observes.
pub trait RegisterObserver: Send + Sync {
    fn notify(&self, event: &RegisterEvent);
}

// ── Register ──────────────────────────────────────────────────────────────────

/// One simulated 32-bit hardware register.
pub struct Register {
    key: String,
    value: u32,
    default_value: u32,
    pins: PinRange,
    observer: Option<Arc<dyn RegisterObserver>>,
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register")
            .field("key", &self.key)
            .field("value", &format_hex(self.value))
            .field("default_value", &format_hex(self.default_value))
            .field("pins", &self.pins)
            .finish()
    }
}

impl Register {
    /// Creates a register holding `default_value`, with the hardware pin window.
    pub fn new(key: impl Into<String>, default_value: u32) -> Self {
        Self {
            key: key.into(),
            value: default_value,
            default_value,
            pins: PinRange::HARDWARE,
            observer: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_value(&self) -> u32 {
        self.default_value
    }

    pub fn pin_range(&self) -> PinRange {
        self.pins
    }

    /// Returns the current value.
    pub fn read(&self) -> u32 {
        self.value
    }

    /// Replaces the value and notifies the observer.
    pub fn write(&mut self, value: u32) {
        self.value = value;
        self.notify_register();
    }

    /// Reads one pin as `0` or `1`.
    ///
    /// # Errors
    ///
    /// [`RegisterError::PinOutOfRange`] if `pin` is outside the pin window.
    pub fn read_pin(&self, pin: u8) -> Result<u8, RegisterError> {
        self.pins.check(pin)?;
        Ok(((self.value >> pin) & 0x1) as u8)
    }

    /// Sets (`bit != 0`) or clears (`bit == 0`) one pin.
    ///
    /// Emits a [`RegisterEvent::PinChanged`] instead of a full-register event.
    ///
    /// # Errors
    ///
    /// [`RegisterError::PinOutOfRange`] if `pin` is outside the pin window.
    pub fn write_pin(&mut self, pin: u8, bit: u8) -> Result<(), RegisterError> {
        self.pins.check(pin)?;
        if bit > 0 {
            self.value |= 1u32 << pin;
        } else {
            self.value &= !(1u32 << pin);
        }
        if let Some(observer) = &self.observer {
            observer.notify(&RegisterEvent::PinChanged {
                key: self.key.clone(),
                pin,
                bit: u8::from(bit > 0),
            });
        }
        Ok(())
    }

    /// Raw bit access over the full 32-bit width, ignoring the pin window.
    pub fn bit(&self, index: u8) -> Result<u8, RegisterError> {
        if index >= REGISTER_WIDTH {
            return Err(RegisterError::BitOutOfRange(index));
        }
        Ok(((self.value >> index) & 0x1) as u8)
    }

    /// Renders the value as `0x` + eight upper-case hex digits.
    pub fn to_hex(&self) -> String {
        format_hex(self.value)
    }

    /// Loads the value from hex text and notifies the observer.
    ///
    /// Returns the parsed value.  On a strict-mode failure the register keeps
    /// its previous value.
    pub fn from_hex(&mut self, raw: &str, mode: HexParsing) -> Result<u32, RegisterError> {
        let value = parse_hex(raw, mode)?;
        self.write(value);
        Ok(value)
    }

    /// Restores the default value.
    pub fn reset(&mut self) {
        self.write(self.default_value);
    }

    pub(crate) fn set_pin_range(&mut self, pins: PinRange) {
        self.pins = pins;
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn RegisterObserver>) {
        self.observer = Some(observer);
    }

    fn notify_register(&self) {
        if let Some(observer) = &self.observer {
            observer.notify(&RegisterEvent::RegisterChanged {
                key: self.key.clone(),
                value: self.value,
            });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
