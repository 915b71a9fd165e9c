//! Staging chunks and DMA buffer sizing.
//!
//! A [`StagingChunk`] is the memory one DMA transfer lands in. Chunks are
//! allocated once per capture with page alignment, lent to the board for a
//! fill cycle and then drained into the ring buffer.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::constants::{CHUNK_BYTE_ALIGNMENT, CHUNK_SAMPLE_ALIGNMENT};
use crate::error::{DigitizerError, Result};

/// Raw sample code as delivered by the board
pub type RawSample = u16;

/// Derived DMA buffer geometry for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Samples per channel in each chunk (multiple of 64)
    pub samples_per_buffer: usize,
    /// Bytes the board writes into each chunk
    pub bytes_per_buffer: usize,
    /// Number of chunks cycled per sweep
    pub buffers_per_acquisition: usize,
    /// Samples per channel across one sweep of all chunks
    pub samples_per_acquisition: usize,
    pub channel_count: usize,
    pub bytes_per_sample: usize,
}

impl BufferLayout {
    /// Split the samples expected over `integration_time_secs` evenly across
    /// `buffers_per_acquisition` chunks, rounding each chunk down to a
    /// multiple of 64 samples.
    pub fn compute(
        sample_rate: u32,
        integration_time_secs: f64,
        channel_count: usize,
        bits_per_sample: u32,
        buffers_per_acquisition: usize,
    ) -> Result<Self> {
        if buffers_per_acquisition == 0 {
            return Err(DigitizerError::InvalidParameter(
                "buffers per acquisition must be at least 1".into(),
            ));
        }
        if channel_count == 0 {
            return Err(DigitizerError::InvalidParameter(
                "no input channels selected".into(),
            ));
        }
        if bits_per_sample == 0 || bits_per_sample > 16 {
            return Err(DigitizerError::InvalidParameter(format!(
                "unsupported sample width of {} bits",
                bits_per_sample
            )));
        }

        let estimated = (sample_rate as f64 * integration_time_secs).round();
        if !estimated.is_finite() || estimated >= usize::MAX as f64 {
            return Err(too_large(sample_rate, integration_time_secs));
        }
        let mut samples_per_buffer = estimated as usize / buffers_per_acquisition;
        samples_per_buffer -= samples_per_buffer % CHUNK_SAMPLE_ALIGNMENT;

        if samples_per_buffer == 0 {
            return Err(DigitizerError::InvalidParameter(format!(
                "integration time of {} s at {} S/s yields empty buffers \
                 (need at least {} samples per buffer)",
                integration_time_secs, sample_rate, CHUNK_SAMPLE_ALIGNMENT
            )));
        }

        let bytes_per_sample = bits_per_sample.div_ceil(8) as usize;
        let bytes_per_buffer = samples_per_buffer
            .checked_mul(channel_count)
            .and_then(|n| n.checked_mul(bytes_per_sample))
            .ok_or_else(|| too_large(sample_rate, integration_time_secs))?;
        let samples_per_acquisition = samples_per_buffer
            .checked_mul(buffers_per_acquisition)
            .ok_or_else(|| too_large(sample_rate, integration_time_secs))?;

        Ok(Self {
            samples_per_buffer,
            bytes_per_buffer,
            buffers_per_acquisition,
            samples_per_acquisition,
            channel_count,
            bytes_per_sample,
        })
    }

    /// Fail if a chunk holds more samples per channel than the board can
    /// transfer in one buffer.
    pub fn check_board_limit(&self, max_samples_per_channel: u32) -> Result<()> {
        if self.samples_per_buffer > max_samples_per_channel as usize {
            return Err(DigitizerError::InvalidParameter(format!(
                "{} samples per buffer exceeds the board limit of {}",
                self.samples_per_buffer, max_samples_per_channel
            )));
        }
        Ok(())
    }

    /// Raw samples in one chunk, counting every enabled channel.
    pub fn chunk_len(&self) -> usize {
        self.samples_per_buffer * self.channel_count
    }
}

fn too_large(sample_rate: u32, integration_time_secs: f64) -> DigitizerError {
    DigitizerError::InvalidParameter(format!(
        "integration time of {} s at {} S/s needs buffers larger than memory can address",
        integration_time_secs, sample_rate
    ))
}

/// Page-aligned, zero-initialised sample buffer for one DMA transfer.
pub struct StagingChunk {
    ptr: NonNull<RawSample>,
    len: usize,
    layout: Layout,
}

// The chunk exclusively owns its allocation.
unsafe impl Send for StagingChunk {}

impl StagingChunk {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(DigitizerError::InvalidParameter(
                "staging chunk must hold at least one sample".into(),
            ));
        }

        let size = len
            .checked_mul(std::mem::size_of::<RawSample>())
            .ok_or_else(|| DigitizerError::InvalidParameter("staging chunk too large".into()))?;
        let layout = Layout::from_size_align(size, CHUNK_BYTE_ALIGNMENT)
            .map_err(|e| DigitizerError::InvalidParameter(format!("chunk layout: {}", e)))?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut RawSample;
        let ptr = NonNull::new(raw).ok_or_else(|| {
            DigitizerError::InvalidParameter(format!("failed to allocate {} byte chunk", size))
        })?;

        Ok(Self { ptr, len, layout })
    }

    /// Allocate `count` chunks sized for `layout`.
    pub fn allocate(layout: &BufferLayout, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::new(layout.chunk_len())).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<RawSample>()
    }

    pub fn as_slice(&self) -> &[RawSample] {
        // SAFETY: ptr is valid for len initialised samples for the life of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [RawSample] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const RawSample {
        self.ptr.as_ptr()
    }
}

impl Drop for StagingChunk {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

impl std::fmt::Debug for StagingChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingChunk")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
