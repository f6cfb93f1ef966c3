use crate::error::AppError;
use serde::Deserialize;

pub mod mock;
pub mod srf02;

// SRF02 answers on 0xE0 in 8-bit notation; 0x70 for 7-bit addressing.
pub const DEFAULT_I2C_ADDRESS_7BIT: u16 = 0x70;
pub const DEFAULT_I2C_BUS: u8 = 4;

/// Command register on write, software revision on read.
pub const COMMAND_REGISTER: u8 = 0x00;
pub const RANGE_HIGH_REGISTER: u8 = 0x02;
pub const RANGE_LOW_REGISTER: u8 = 0x03;

/// Documented ranging limits of the sensor, in centimeters.
pub const RANGE_MIN_CM: u16 = 15;
pub const RANGE_MAX_CM: u16 = 700;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeUnit {
    Inches,
    #[default]
    Centimeters,
    Microseconds,
}

impl RangeUnit {
    /// Command byte that starts a ranging cycle reporting in this unit.
    pub fn ranging_command(self) -> u8 {
        match self {
            RangeUnit::Inches => 0x50,
            RangeUnit::Centimeters => 0x51,
            RangeUnit::Microseconds => 0x52,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RangeUnit::Inches => "in",
            RangeUnit::Centimeters => "cm",
            RangeUnit::Microseconds => "us",
        }
    }
}

/// A raw range value assembled from the high and low result registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RangeReading(u16);

impl RangeReading {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn from_registers(high: u8, low: u8) -> Self {
        Self(u16::from_be_bytes([high, low]))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_within_sensor_range(self) -> bool {
        (RANGE_MIN_CM..=RANGE_MAX_CM).contains(&self.0)
    }
}

impl std::fmt::Display for RangeReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two SMBus byte-data primitives the ranging protocol runs on.
pub trait RangeBus: Send {
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AppError>;
    fn read_register(&mut self, register: u8) -> Result<u8, AppError>;
}

impl RangeBus for Box<dyn RangeBus> {
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AppError> {
        (**self).write_register(register, value)
    }
    fn read_register(&mut self, register: u8) -> Result<u8, AppError> {
        (**self).read_register(register)
    }
}
