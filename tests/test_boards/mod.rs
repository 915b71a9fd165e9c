use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use digicap::config::{DigitizerConfig, SampleRate};
use digicap::simulation::{SimulatedBoard, Waveform};

/// 1 MS/s, 4 x 256 sample buffers per sweep, 64k sample ring
pub fn small_config() -> DigitizerConfig {
    let mut config = DigitizerConfig::default();
    config.sample_rate = SampleRate::from_hz(1_000_000);
    config.integration_time_secs = 0.001024;
    config.ring.capacity = 1 << 16;
    config.wait_timeout_ms = 50;
    config
}

pub fn ramp_board() -> Arc<SimulatedBoard> {
    Arc::new(SimulatedBoard::new(Waveform::Ramp))
}

/// Poll `cond` until it holds or `timeout` expires.
pub fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Assert that `samples` is an unbroken run of the ramp waveform.
pub fn assert_contiguous_ramp(samples: &[u16]) {
    for pair in samples.windows(2) {
        assert_eq!(
            pair[1],
            pair[0].wrapping_add(1),
            "ramp broken at {} -> {}",
            pair[0],
            pair[1]
        );
    }
}
