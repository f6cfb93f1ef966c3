use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("device or resource busy")]
    Busy,
    #[error("invalid write length: expected 2 bytes, got {0}")]
    BadLength(usize),
    #[error("bus transaction failed: {0}")]
    BusTransactionFailed(String),
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("continuous measurement disabled")]
    Disabled,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown sensor handle: {0}")]
    UnknownHandle(i32),
    #[error("event channel closed")]
    ChannelClosed,
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("async runtime unavailable: {0}")]
    Runtime(String),
    #[error("state lock poisoned")]
    StateLock,
}

impl AppError {
    /// Negative errno-style status reported through the device node.
    pub fn status_code(&self) -> i32 {
        match self {
            AppError::Busy => -16,
            AppError::BadLength(_) | AppError::InvalidInput(_) | AppError::UnknownHandle(_) => -22,
            AppError::BusTransactionFailed(_) | AppError::I2c(_) => -5,
            AppError::NotSupported(_) => -38,
            AppError::Disabled => -61,
            AppError::ChannelClosed => -32,
            AppError::Runtime(_) => -11,
            AppError::StateLock => -131,
        }
    }
}
