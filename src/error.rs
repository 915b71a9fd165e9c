use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigitizerError {
    #[error("Could not open board handle with system ID# {system_id} and board ID# {board_id}")]
    DeviceNotFound { system_id: u32, board_id: u32 },

    #[error("Device error in {operation}: vendor status {status}")]
    Device {
        operation: &'static str,
        status: u32,
    },

    #[error("Requested sample rate of {0} samples per second is not valid")]
    UnsupportedRate(u32),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient data: need {needed} samples, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Overrun: {lost} samples were overwritten before they were read")]
    Overrun { lost: u64 },

    #[error("Capture is already running")]
    AlreadyRunning,

    #[error("Timed out after {0:?} waiting for a chunk to fill")]
    Timeout(Duration),

    #[error("Could not spawn capture thread: {0}")]
    ThreadSpawn(String),

    #[error("Capture thread join failed: {0}")]
    ThreadJoin(String),

    #[error("Acquisition stopped: {0}")]
    AcquisitionFailed(Box<DigitizerError>),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DigitizerError>;
