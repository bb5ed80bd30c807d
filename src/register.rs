//! This module is used to define the registers of the PLxx controllers.
//!
//! Single-byte values live at RAM addresses `0..=255` and are read with one transaction.
//! Quantities wider than a byte are spread over an LSB and an MSB address. A tag refers to
//! such a pair through a packed address above 255 (`msb << 8 | lsb`), which must be listed in
//! [`PACKED_REGISTERS`] so the two bytes can be combined.

use strum_macros::{EnumIter, FromRepr};

/// Commonly used single-byte RAM registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum PlRegister {
    /// __R__ - Software version.
    Version = 0,
    /// __R__ - Battery voltage.
    ///
    /// Raw value in units of 0.1V on a 12V system.
    BatteryVoltage = 50,
    /// __R__ - Solar input voltage, MSB.
    SolarVoltage = 53,
    /// __R__ - Regulator state.
    RegulatorState = 101,
}

impl From<PlRegister> for u8 {
    fn from(value: PlRegister) -> Self {
        value as u8
    }
}

/// How an LSB/MSB byte pair turns into a number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterClass {
    /// `((msb * 256) + lsb + 38400) / 5.12`, in the controller's native voltage units.
    Voltage,
    /// `msb * 8 + lsb`, ampere-hour counters.
    AmpHours,
}

impl RegisterClass {
    /// Combine a byte pair read from the controller.
    pub fn combine(self, lsb: u8, msb: u8) -> f64 {
        let lsb = f64::from(lsb);
        let msb = f64::from(msb);
        match self {
            RegisterClass::Voltage => ((msb * 256.0) + lsb + 38400.0) / 5.12,
            RegisterClass::AmpHours => msb * 8.0 + lsb,
        }
    }
}

/// An LSB/MSB address pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PackedAddress {
    pub lsb: u8,
    pub msb: u8,
}

impl PackedAddress {
    pub const fn new(lsb: u8, msb: u8) -> Self {
        Self { lsb, msb }
    }

    /// Split a tag address. Returns `None` for single-byte addresses.
    pub const fn unpack(address: u16) -> Option<Self> {
        if is_packed(address) {
            Some(Self {
                lsb: (address & 0xFF) as u8,
                msb: (address >> 8) as u8,
            })
        } else {
            None
        }
    }

    pub const fn pack(self) -> u16 {
        ((self.msb as u16) << 8) | self.lsb as u16
    }
}

/// Whether a tag address refers to a byte pair rather than a single register.
pub const fn is_packed(address: u16) -> bool {
    address > 0xFF
}

/// An entry of the two-byte conversion table.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PackedRegister {
    pub name: &'static str,
    pub address: PackedAddress,
    pub class: RegisterClass,
}

/// Every two-byte quantity the bridge knows how to decode.
///
/// The PL20 register list only names the solar voltage MSB ([`PlRegister::SolarVoltage`]).
/// The solar voltage LSB and the amp-hour pairs are not on that list; check them against the
/// RAM map of the controller in use.
pub const PACKED_REGISTERS: &[PackedRegister] = &[
    PackedRegister {
        name: "solar voltage",
        address: PackedAddress::new(194, PlRegister::SolarVoltage as u8),
        class: RegisterClass::Voltage,
    },
    PackedRegister {
        name: "charge Ah",
        address: PackedAddress::new(189, 190),
        class: RegisterClass::AmpHours,
    },
    PackedRegister {
        name: "load Ah",
        address: PackedAddress::new(191, 192),
        class: RegisterClass::AmpHours,
    },
];

/// Look up a packed tag address in the conversion table.
pub fn lookup_packed(address: u16) -> Option<&'static PackedRegister> {
    PACKED_REGISTERS
        .iter()
        .find(|register| register.address.pack() == address)
}
