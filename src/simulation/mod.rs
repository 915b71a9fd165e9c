mod board;
#[cfg(feature = "simulation")]
mod noise;
mod signal;

pub use board::{
    Pacing, STATUS_BUFFER_NOT_READY, STATUS_FAILED, SimulatedBoard, SimulatedFault,
    SimulatedLocator,
};
#[cfg(feature = "simulation")]
pub use noise::GaussianNoise;
pub use signal::{CODE_MID_SCALE, SignalGenerator, Waveform, to_code};
