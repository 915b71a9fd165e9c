pub mod acquisition;
pub mod chunk;
pub mod config;
pub mod constants;
pub mod conversion;
pub mod device;
pub mod error;
pub mod output;
pub mod ring_buffer;
pub mod session;
pub mod simulation;

pub use acquisition::{ChannelNotifier, DataReadyHandler, SweepReport};
pub use config::DigitizerConfig;
pub use error::{DigitizerError, Result};
pub use ring_buffer::{OverrunPolicy, SampleRingBuffer};
pub use session::AcquisitionSession;
