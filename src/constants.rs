//! Board constants for the acquisition pipeline
//!
//! Values that are fixed by the digitizer hardware or by the DMA allocation
//! strategy rather than chosen per capture.

use std::time::Duration;

/// Discrete sample rates the on-board clock can be programmed to, in
/// samples per second.
pub const SUPPORTED_SAMPLE_RATES: [u32; 20] = [
    1_000,
    2_000,
    5_000,
    10_000,
    20_000,
    50_000,
    100_000,
    200_000,
    500_000,
    1_000_000,
    2_000_000,
    5_000_000,
    10_000_000,
    20_000_000,
    25_000_000,
    50_000_000,
    100_000_000,
    125_000_000,
    160_000_000,
    180_000_000,
];

/// Samples per staging chunk must be a multiple of this (page-aligned DMA).
pub const CHUNK_SAMPLE_ALIGNMENT: usize = 64;

/// Byte alignment of every staging chunk allocation.
pub const CHUNK_BYTE_ALIGNMENT: usize = 4096;

/// Upper bound on a single wait for the DMA engine to fill a chunk.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of staging chunks cycled through per acquisition.
pub const DEFAULT_BUFFERS_PER_ACQUISITION: usize = 4;

/// Default ring buffer capacity in samples.
pub const DEFAULT_RING_CAPACITY: usize = 1 << 24;

/// Channel mask bit for input A.
pub const CHANNEL_A: u32 = 1;

/// Channel mask bit for input B.
pub const CHANNEL_B: u32 = 2;

/// Trigger timeouts are programmed in ticks of this length.
pub const TRIGGER_TIMEOUT_TICK: Duration = Duration::from_micros(10);
