//! Wiring of the simulated board: which GPIO each LED and button sits on.
//!
//! LEDs are driven by the program under test, so they are read from the
//! `output` register.  Buttons are operated from the panel, so pressing one
//! writes the matching pin of the `input` register.
//!
//! | Part   | GPIO | Register |
//! |--------|------|----------|
//! | `LED1` | 18   | `output` |
//! | `LED2` | 23   | `output` |
//! | `LED3` | 24   | `output` |
//! | `LED4` | 25   | `output` |
//! | `BTN1` | 22   | `input`  |
//! | `BTN2` | 27   | `input`  |
//! | `BTN3` | 17   | `input`  |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use simpi_core::{RegisterBank, RegisterError};
use thiserror::Error;

/// Register the LEDs are read from.
pub const LED_REGISTER: &str = "output";

/// Register the buttons write to.
pub const BUTTON_REGISTER: &str = "input";

/// Errors raised by board operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("no button named {0:?} on this board")]
    UnknownButton(String),

    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// LED and button names mapped to GPIO numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLayout {
    #[serde(default = "default_leds")]
    pub leds: BTreeMap<String, u8>,
    #[serde(default = "default_buttons")]
    pub buttons: BTreeMap<String, u8>,
}

fn default_leds() -> BTreeMap<String, u8> {
    [("LED1", 18), ("LED2", 23), ("LED3", 24), ("LED4", 25)]
        .into_iter()
        .map(|(name, pin)| (name.to_string(), pin))
        .collect()
}

fn default_buttons() -> BTreeMap<String, u8> {
    [("BTN1", 22), ("BTN2", 27), ("BTN3", 17)]
        .into_iter()
        .map(|(name, pin)| (name.to_string(), pin))
        .collect()
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self {
            leds: default_leds(),
            buttons: default_buttons(),
        }
    }
}

impl BoardLayout {
    /// Drives the button's input pin high.
    pub fn press(&self, bank: &mut RegisterBank, button: &str) -> Result<(), BoardError> {
        self.set_button(bank, button, 1)
    }

    /// Drives the button's input pin low.
    pub fn release(&self, bank: &mut RegisterBank, button: &str) -> Result<(), BoardError> {
        self.set_button(bank, button, 0)
    }

    /// Current level of every LED, in name order.
    pub fn led_states(&self, bank: &RegisterBank) -> Result<Vec<(String, bool)>, RegisterError> {
        self.leds
            .iter()
            .map(|(name, pin)| Ok((name.clone(), bank.read_pin(*pin, LED_REGISTER)? == 1)))
            .collect()
    }

    /// GPIO numbers of every button, in name order.
    pub fn button_pins(&self) -> Vec<u8> {
        self.buttons.values().copied().collect()
    }

    /// GPIO numbers of every LED, in name order.
    pub fn led_pins(&self) -> Vec<u8> {
        self.leds.values().copied().collect()
    }

    /// The LED wired to `pin`, if any.
    pub fn led_on_pin(&self, pin: u8) -> Option<&str> {
        self.leds
            .iter()
            .find(|(_, p)| **p == pin)
            .map(|(name, _)| name.as_str())
    }

    fn set_button(&self, bank: &mut RegisterBank, button: &str, bit: u8) -> Result<(), BoardError> {
        let pin = self
            .buttons
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(button))
            .map(|(_, pin)| *pin)
            .ok_or_else(|| BoardError::UnknownButton(button.to_string()))?;
        bank.write_pin(pin, bit, BUTTON_REGISTER)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
