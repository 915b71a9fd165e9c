//! Conversion of raw sample codes to volts.

use crate::chunk::RawSample;
use crate::config::{InputConfig, InputRange};

/// Maps a raw sample code to a physical value.
pub trait SampleConverter: Send + Sync {
    fn to_physical(&self, raw: RawSample) -> f32;

    fn convert(&self, raw: &[RawSample]) -> Vec<f32> {
        raw.iter().map(|&s| self.to_physical(s)).collect()
    }
}

/// Linear code-to-volts transform for an unsigned, offset-binary digitizer.
///
/// Codes are calibrated so that the midpoint between the two central codes
/// is 0 V and the extreme codes sit half an LSB inside full scale:
///
/// `volts = range * (code - zero) / zero` with `zero = 2^(bits-1) - 0.5`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageScale {
    code_zero: f32,
    input_range_volts: f32,
}

impl VoltageScale {
    pub fn new(bits_per_sample: u32, input_range_volts: f32) -> Self {
        let bits = bits_per_sample.clamp(1, 16);
        Self {
            code_zero: (1u32 << (bits - 1)) as f32 - 0.5,
            input_range_volts,
        }
    }

    pub fn for_range(bits_per_sample: u32, range: InputRange) -> Self {
        Self::new(bits_per_sample, range.volts())
    }

    pub fn input_range_volts(&self) -> f32 {
        self.input_range_volts
    }
}

impl SampleConverter for VoltageScale {
    #[inline]
    fn to_physical(&self, raw: RawSample) -> f32 {
        self.input_range_volts * ((raw as f32 - self.code_zero) / self.code_zero)
    }
}

/// One [`VoltageScale`] per enabled channel, applied to channel-interleaved
/// data.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelScales {
    scales: Vec<VoltageScale>,
}

impl ChannelScales {
    /// Scales for `inputs`, in interleave order.
    pub fn new(bits_per_sample: u32, inputs: &[InputConfig]) -> Self {
        let mut scales: Vec<VoltageScale> = inputs
            .iter()
            .map(|input| VoltageScale::for_range(bits_per_sample, input.range))
            .collect();
        if scales.is_empty() {
            scales.push(VoltageScale::for_range(bits_per_sample, InputRange::default()));
        }
        Self { scales }
    }

    pub fn channel_count(&self) -> usize {
        self.scales.len()
    }

    /// Convert samples whose first element sits at `stream_index` in the
    /// interleaved stream, so each sample gets its own channel's range.
    pub fn convert_from(&self, stream_index: u64, raw: &[RawSample]) -> Vec<f32> {
        let channels = self.scales.len() as u64;
        let phase = (stream_index % channels) as usize;
        raw.iter()
            .zip(self.scales.iter().cycle().skip(phase))
            .map(|(&code, scale)| scale.to_physical(code))
            .collect()
    }
}
