use super::MeasurementEngine;
use super::history::COMMAND_LEN;
use crate::error::AppError;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// An open handle on the device node. Only one may exist at a time; dropping it closes the node.
pub struct DeviceHandle {
    engine: MeasurementEngine,
}

impl MeasurementEngine {
    pub fn open_device(&self) -> Result<DeviceHandle, AppError> {
        self.inner
            .device_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::Busy)?;
        debug!("Device node opened");
        Ok(DeviceHandle {
            engine: self.clone(),
        })
    }

    pub fn is_device_open(&self) -> bool {
        self.inner.device_open.load(Ordering::Acquire)
    }
}

impl DeviceHandle {
    /// Accepts exactly one 2-byte command record; anything else leaves the history untouched.
    pub fn write(&self, buf: &[u8]) -> Result<usize, AppError> {
        let record: [u8; COMMAND_LEN] = buf.try_into().map_err(|_| {
            warn!(length = buf.len(), "Rejected device write with bad length");
            AppError::BadLength(buf.len())
        })?;
        self.engine.append_command(record)?;
        Ok(COMMAND_LEN)
    }

    pub fn read(&self, len: usize) -> Result<Vec<u8>, AppError> {
        self.engine.read_command_history(len)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.engine.inner.device_open.store(false, Ordering::Release);
        debug!("Device node released");
    }
}
