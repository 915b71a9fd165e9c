//! Hardware boundary of the capture pipeline.
//!
//! [`Board`] is the subset of the digitizer vendor API the session needs.
//! Implementations translate each call to the vendor library and map a
//! non-zero vendor status to [`DigitizerError::Device`] with
//! [`check_status`].
//!
//! Methods take `&self`: the vendor handle may be used from the control
//! thread and the capture thread at the same time, so a board is shared as
//! `Arc<dyn Board>`.

use std::sync::Arc;
use std::time::Duration;

use crate::chunk::StagingChunk;
use crate::config::{AuxIoConfig, Coupling, ExternalTriggerRange, InputConfig, TriggerEngine};
use crate::error::{DigitizerError, Result};

/// Vendor status code for success
pub const STATUS_SUCCESS: u32 = 0;

/// Turn a vendor status code into a `Result`.
pub fn check_status(operation: &'static str, status: u32) -> Result<()> {
    if status == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(DigitizerError::Device { operation, status })
    }
}

/// Static board properties reported when a board is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub max_samples_per_channel: u32,
    pub bits_per_sample: u32,
}

/// Parameters for continuous-mode asynchronous DMA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSetup {
    pub channel_mask: u32,
    /// Samples per channel in each chunk
    pub samples_per_chunk: usize,
    pub chunk_count: usize,
}

pub trait Board: Send + Sync {
    fn channel_info(&self) -> Result<ChannelInfo>;

    /// Program the internal sample clock (rising edge).
    fn set_capture_clock(&self, sample_rate: u32) -> Result<()>;

    /// Program the analog front end of one channel (`channel` is a mask bit).
    fn input_control(&self, channel: u32, input: &InputConfig) -> Result<()>;

    fn set_bw_limit(&self, channel: u32, enabled: bool) -> Result<()>;

    fn set_trigger_operation(&self, engine_j: &TriggerEngine, engine_k: &TriggerEngine)
    -> Result<()>;

    fn set_external_trigger(&self, coupling: Coupling, range: ExternalTriggerRange)
    -> Result<()>;

    /// Set the auto-trigger timeout in 10 µs ticks (0 waits forever).
    fn set_trigger_timeout(&self, ticks: u32) -> Result<()>;

    fn configure_aux_io(&self, aux: &AuxIoConfig) -> Result<()>;

    /// Prepare the board for continuous streaming into chunks.
    fn arm_continuous_transfer(&self, setup: &TransferSetup) -> Result<()>;

    /// Queue a chunk for the DMA engine to fill.
    fn submit_chunk(&self, chunk: &mut StagingChunk, byte_size: usize) -> Result<()>;

    fn start_capture(&self) -> Result<()>;

    /// Block until `chunk` has been filled, or fail with `Timeout` after
    /// `timeout`. Chunks complete in the order they were submitted.
    fn wait_chunk_filled(&self, chunk: &mut StagingChunk, timeout: Duration) -> Result<()>;

    /// Cancel all outstanding transfers. Calling this while idle succeeds.
    fn abort_transfer(&self) -> Result<()>;
}

/// Finds boards by system and board id.
pub trait BoardLocator {
    fn open(&self, system_id: u32, board_id: u32) -> Result<Arc<dyn Board>>;
}
