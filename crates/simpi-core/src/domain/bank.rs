//! The register bank: every simulated GPIO register, addressed by key.
//!
//! The bank owns its registers exclusively.  Keys are fixed when the bank is
//! built and iteration always follows construction order, which matters
//! because outbound sync frames are built by walking the bank.

use std::sync::Arc;

use crate::domain::register::{PinRange, Register, RegisterError, RegisterObserver};

/// The register layout of the SimPi board, in wire order.
///
/// | Key      | Default      | Meaning                                  |
/// |----------|--------------|------------------------------------------|
/// | `input`  | `0x00000000` | Levels read by the program               |
/// | `output` | `0x00000000` | Levels driven by the program             |
/// | `config` | `0xFFFFFFFF` | 1 = input, 0 = output (all inputs)       |
/// | `pwm`    | `0x00000000` | 1 = PWM enabled on an output pin         |
/// | `inten`  | `0x00000000` | 1 = interrupt enabled on an input pin    |
/// | `int0`   | `0x00000000` | Interrupt mode, bit 2^0                  |
/// | `int1`   | `0x00000000` | Interrupt mode, bit 2^1                  |
pub const SIMPI_REGISTERS: [(&str, u32); 7] = [
    ("input", 0x0000_0000),
    ("output", 0x0000_0000),
    ("config", 0xFFFF_FFFF),
    ("pwm", 0x0000_0000),
    ("inten", 0x0000_0000),
    ("int0", 0x0000_0000),
    ("int1", 0x0000_0000),
];

/// An ordered, fixed set of uniquely keyed registers.
#[derive(Debug)]
pub struct RegisterBank {
    registers: Vec<Register>,
    pins: PinRange,
}

impl RegisterBank {
    /// Builds a bank from `(key, default_value)` pairs, preserving their order.
    ///
    /// # Errors
    ///
    /// [`RegisterError::DuplicateRegister`] if a key appears twice.
    pub fn new(layout: &[(&str, u32)]) -> Result<Self, RegisterError> {
        if let Some(key) = first_duplicate(layout) {
            return Err(RegisterError::DuplicateRegister(key.to_string()));
        }
        Ok(Self::from_unique(layout))
    }

    /// The standard SimPi bank (see [`SIMPI_REGISTERS`]).
    ///
    /// `SIMPI_REGISTERS` has unique keys, which the unit tests assert, so this
    /// skips the duplicate check `new` performs.
    pub fn simpi() -> Self {
        Self::from_unique(&SIMPI_REGISTERS)
    }

    /// Builds the bank from a layout whose keys are already known to be unique.
    fn from_unique(layout: &[(&str, u32)]) -> Self {
        Self {
            registers: layout
                .iter()
                .map(|(key, default_value)| Register::new(*key, *default_value))
                .collect(),
            pins: PinRange::HARDWARE,
        }
    }

    /// Looks up a register by key.
    pub fn get(&self, key: &str) -> Result<&Register, RegisterError> {
        self.registers
            .iter()
            .find(|r| r.key() == key)
            .ok_or_else(|| RegisterError::UnknownRegister(key.to_string()))
    }

    /// Looks up a register by key for mutation.
    pub fn get_mut(&mut self, key: &str) -> Result<&mut Register, RegisterError> {
        self.registers
            .iter_mut()
            .find(|r| r.key() == key)
            .ok_or_else(|| RegisterError::UnknownRegister(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registers.iter().any(|r| r.key() == key)
    }

    /// Register keys in construction order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.registers.iter().map(Register::key)
    }

    /// Registers in construction order.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    /// Calls `f` on every register in construction order.
    pub fn for_each_register<F: FnMut(&Register)>(&self, f: F) {
        self.registers.iter().for_each(f);
    }

    /// Reads `pin` of register `key`.
    ///
    /// The key is checked before the pin, so an unknown key always reports
    /// [`RegisterError::UnknownRegister`].
    pub fn read_pin(&self, pin: u8, key: &str) -> Result<u8, RegisterError> {
        self.get(key)?.read_pin(pin)
    }

    /// Writes `pin` of register `key`.
    pub fn write_pin(&mut self, pin: u8, bit: u8, key: &str) -> Result<(), RegisterError> {
        self.get_mut(key)?.write_pin(pin, bit)
    }

    /// The pin window shared by every register in the bank.
    pub fn pin_range(&self) -> PinRange {
        self.pins
    }

    /// Replaces the shared pin window.  [`RegisterBank::reset`] restores the
    /// hardware window.
    pub fn set_pin_range(&mut self, min: u8, max: u8) -> Result<(), RegisterError> {
        let pins = PinRange::new(min, max)?;
        self.apply_pin_range(pins);
        Ok(())
    }

    /// Resets every register to its default and restores the hardware pin window.
    pub fn reset(&mut self) {
        for register in &mut self.registers {
            register.reset();
        }
        self.apply_pin_range(PinRange::HARDWARE);
    }

    /// Attaches `observer` to every register in the bank.
    pub fn subscribe(&mut self, observer: Arc<dyn RegisterObserver>) {
        for register in &mut self.registers {
            register.set_observer(Arc::clone(&observer));
        }
    }

    fn apply_pin_range(&mut self, pins: PinRange) {
        self.pins = pins;
        for register in &mut self.registers {
            register.set_pin_range(pins);
        }
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::simpi()
    }
}

fn first_duplicate<'a>(layout: &[(&'a str, u32)]) -> Option<&'a str> {
    layout
        .iter()
        .enumerate()
        .find(|(i, (key, _))| layout[..*i].iter().any(|(seen, _)| seen == key))
        .map(|(_, (key, _))| *key)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
