use std::f64::consts::PI;

/// Mid-scale code of an unsigned 16 bit sample (0 V)
pub const CODE_MID_SCALE: f64 = 32767.5;

/// Synthetic input applied to the simulated board
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Every raw sample is one more than the previous one (wrapping), across
    /// channels and chunks. Makes ordering and gaps trivial to check.
    Ramp,
    /// A fixed code on every sample
    Constant(u16),
    /// Sine tone; `amplitude` is a fraction of full scale. Channel B lags
    /// channel A by 90°.
    Sine { frequency_hz: f64, amplitude: f64 },
}

/// Stateful generator that keeps waveforms continuous across chunks
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    waveform: Waveform,
    index: u64,
}

impl SignalGenerator {
    pub fn new(waveform: Waveform) -> Self {
        Self { waveform, index: 0 }
    }

    /// Fill `out` with interleaved samples for `channel_count` channels.
    pub fn fill(&mut self, out: &mut [u16], channel_count: usize, sample_rate: u32) {
        let channels = channel_count.max(1);
        match self.waveform {
            Waveform::Ramp => {
                for sample in out.iter_mut() {
                    *sample = self.index as u16;
                    self.index = self.index.wrapping_add(1);
                }
            }
            Waveform::Constant(code) => out.fill(code),
            Waveform::Sine {
                frequency_hz,
                amplitude,
            } => {
                let step = 2.0 * PI * frequency_hz / sample_rate.max(1) as f64;
                for frame in out.chunks_mut(channels) {
                    let phase = step * self.index as f64;
                    for (c, sample) in frame.iter_mut().enumerate() {
                        let value = (phase - c as f64 * PI / 2.0).sin();
                        *sample = to_code(value * amplitude);
                    }
                    self.index += 1;
                }
            }
        }
    }
}

/// Convert a value in full-scale units (-1..1) to a raw code.
pub fn to_code(value: f64) -> u16 {
    (CODE_MID_SCALE + value * CODE_MID_SCALE)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16
}
