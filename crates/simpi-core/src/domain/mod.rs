//! Domain entities for SimPi.
//!
//! Pure register model with no I/O, async runtime or UI dependencies.  The
//! presentation layer learns about changes only through
//! [`register::RegisterObserver`].

/// A single 32-bit register with pin-level access and hex (de)serialization.
pub mod register;

/// The fixed, ordered collection of registers.
pub mod bank;
