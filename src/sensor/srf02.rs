use crate::error::AppError;
use crate::sensor::RangeBus;

#[cfg(target_os = "linux")]
use rppal::i2c::I2c;
#[cfg(target_os = "linux")]
use tracing::debug;

#[cfg(target_os = "linux")]
pub struct Srf02Bus {
    i2c: I2c,
}

#[cfg(target_os = "linux")]
impl Srf02Bus {
    pub fn open(bus: u8, address: u16) -> Result<Self, AppError> {
        let mut i2c = I2c::with_bus(bus).map_err(|err| AppError::I2c(err.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|err| AppError::I2c(err.to_string()))?;
        debug!(
            bus = bus,
            address = format_args!("{address:#04x}"),
            "SRF02 bus opened"
        );
        Ok(Self { i2c })
    }
}

#[cfg(target_os = "linux")]
impl RangeBus for Srf02Bus {
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AppError> {
        self.i2c
            .smbus_write_byte(register, value)
            .map_err(|err| AppError::BusTransactionFailed(format!("write {register:#04x}: {err}")))
    }

    fn read_register(&mut self, register: u8) -> Result<u8, AppError> {
        self.i2c
            .smbus_read_byte(register)
            .map_err(|err| AppError::BusTransactionFailed(format!("read {register:#04x}: {err}")))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct Srf02Bus;

#[cfg(not(target_os = "linux"))]
impl Srf02Bus {
    pub fn open(_bus: u8, _address: u16) -> Result<Self, AppError> {
        Err(AppError::I2c(
            "SRF02 bus access requires Linux i2c-dev".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl RangeBus for Srf02Bus {
    fn write_register(&mut self, _register: u8, _value: u8) -> Result<(), AppError> {
        Err(AppError::I2c(
            "SRF02 bus access requires Linux i2c-dev".to_string(),
        ))
    }

    fn read_register(&mut self, _register: u8) -> Result<u8, AppError> {
        Err(AppError::I2c(
            "SRF02 bus access requires Linux i2c-dev".to_string(),
        ))
    }
}
