//! In-process stand-in for a digitizer board.
//!
//! The simulated DMA engine fills a chunk when the capture thread waits on
//! it, in the order chunks were submitted. Faults can be injected to drive
//! the error paths of the capture loop and session.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::chunk::StagingChunk;
use crate::config::{AuxIoConfig, Coupling, ExternalTriggerRange, InputConfig, TriggerEngine};
use crate::constants::SUPPORTED_SAMPLE_RATES;
use crate::device::{Board, BoardLocator, ChannelInfo, TransferSetup, check_status};
use crate::error::{DigitizerError, Result};

#[cfg(feature = "simulation")]
use super::noise::GaussianNoise;
use super::signal::{SignalGenerator, Waveform};

/// Generic failure status
pub const STATUS_FAILED: u32 = 513;

/// Status for waiting on a chunk that is not next in the queue
pub const STATUS_BUFFER_NOT_READY: u32 = 573;

/// Fault raised by `wait_chunk_filled` once enough chunks have been filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFault {
    /// Sleep for the full wait timeout, then time out
    Timeout,
    /// Fail immediately with this vendor status
    Status(u32),
}

/// How long a chunk takes to fill
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Chunks are ready as soon as they are waited on
    Immediate,
    /// Each fill takes a fixed time
    Fixed(Duration),
    /// Each fill takes as long as the real board would at the programmed rate
    RealTime,
}

struct SimState {
    sample_rate: u32,
    setup: Option<TransferSetup>,
    running: bool,
    pending: VecDeque<usize>,
    generator: SignalGenerator,
    #[cfg(feature = "simulation")]
    noise: Option<GaussianNoise>,
    fills: u64,
    submitted: u64,
    aborts: usize,
    fault: Option<(u64, SimulatedFault)>,
    failing: HashMap<&'static str, u32>,
    calls: Vec<&'static str>,
}

pub struct SimulatedBoard {
    info: ChannelInfo,
    pacing: Pacing,
    state: Mutex<SimState>,
}

impl SimulatedBoard {
    /// A 16 bit board whose inputs see `waveform`
    pub fn new(waveform: Waveform) -> Self {
        Self {
            info: ChannelInfo {
                max_samples_per_channel: 256 * 1024 * 1024,
                bits_per_sample: 16,
            },
            pacing: Pacing::Immediate,
            state: Mutex::new(SimState {
                sample_rate: 0,
                setup: None,
                running: false,
                pending: VecDeque::new(),
                generator: SignalGenerator::new(waveform),
                #[cfg(feature = "simulation")]
                noise: None,
                fills: 0,
                submitted: 0,
                aborts: 0,
                fault: None,
                failing: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_channel_info(mut self, info: ChannelInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Add Gaussian noise of `rms` (fraction of full scale) to every chunk.
    #[cfg(feature = "simulation")]
    pub fn with_noise(self, rms: f64, seed: Option<u64>) -> Result<Self> {
        self.lock().noise = Some(GaussianNoise::new(rms, seed)?);
        Ok(self)
    }

    /// Make the wait after `after_fills` successful fills fail with `fault`.
    pub fn inject_fault(&self, after_fills: u64, fault: SimulatedFault) {
        self.lock().fault = Some((after_fills, fault));
    }

    /// Make every call to `operation` fail with `status`.
    pub fn fail_operation(&self, operation: &'static str, status: u32) {
        self.lock().failing.insert(operation, status);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.fault = None;
        state.failing.clear();
    }

    /// Board API calls made so far, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn abort_count(&self) -> usize {
        self.lock().aborts
    }

    pub fn fills(&self) -> u64 {
        self.lock().fills
    }

    pub fn submitted(&self) -> u64 {
        self.lock().submitted
    }

    pub fn pending_chunks(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn transfer_setup(&self) -> Option<TransferSetup> {
        self.lock().setup
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and apply any failure registered for it.
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        state.calls.push(operation);
        let status = state.failing.get(operation).copied().unwrap_or(0);
        check_status(operation, status)?;
        Ok(state)
    }

    fn fill_time(&self, samples: usize, channels: usize, sample_rate: u32) -> Duration {
        match self.pacing {
            Pacing::Immediate => Duration::ZERO,
            Pacing::Fixed(d) => d,
            Pacing::RealTime => {
                let frames = samples / channels.max(1);
                Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64)
            }
        }
    }
}

impl Board for SimulatedBoard {
    fn channel_info(&self) -> Result<ChannelInfo> {
        self.enter("channel_info").map(|_| self.info)
    }

    fn set_capture_clock(&self, sample_rate: u32) -> Result<()> {
        let mut state = self.enter("set_capture_clock")?;
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return check_status("set_capture_clock", STATUS_FAILED);
        }
        state.sample_rate = sample_rate;
        Ok(())
    }

    fn input_control(&self, _channel: u32, _input: &InputConfig) -> Result<()> {
        self.enter("input_control").map(|_| ())
    }

    fn set_bw_limit(&self, _channel: u32, _enabled: bool) -> Result<()> {
        self.enter("set_bw_limit").map(|_| ())
    }

    fn set_trigger_operation(
        &self,
        _engine_j: &TriggerEngine,
        _engine_k: &TriggerEngine,
    ) -> Result<()> {
        self.enter("set_trigger_operation").map(|_| ())
    }

    fn set_external_trigger(
        &self,
        _coupling: Coupling,
        _range: ExternalTriggerRange,
    ) -> Result<()> {
        self.enter("set_external_trigger").map(|_| ())
    }

    fn set_trigger_timeout(&self, _ticks: u32) -> Result<()> {
        self.enter("set_trigger_timeout").map(|_| ())
    }

    fn configure_aux_io(&self, _aux: &AuxIoConfig) -> Result<()> {
        self.enter("configure_aux_io").map(|_| ())
    }

    fn arm_continuous_transfer(&self, setup: &TransferSetup) -> Result<()> {
        let mut state = self.enter("arm_continuous_transfer")?;
        if setup.channel_mask == 0 || setup.samples_per_chunk == 0 {
            return check_status("arm_continuous_transfer", STATUS_FAILED);
        }
        state.setup = Some(*setup);
        state.pending.clear();
        Ok(())
    }

    fn submit_chunk(&self, chunk: &mut StagingChunk, byte_size: usize) -> Result<()> {
        let mut state = self.enter("submit_chunk")?;
        if state.setup.is_none() || byte_size > chunk.byte_len() {
            return check_status("submit_chunk", STATUS_FAILED);
        }
        state.pending.push_back(chunk.as_ptr() as usize);
        state.submitted += 1;
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        let mut state = self.enter("start_capture")?;
        if state.setup.is_none() {
            return check_status("start_capture", STATUS_FAILED);
        }
        state.running = true;
        Ok(())
    }

    fn wait_chunk_filled(&self, chunk: &mut StagingChunk, timeout: Duration) -> Result<()> {
        let (fill_time, fault) = {
            let state = self.lock();
            if !state.running {
                return check_status("wait_chunk_filled", STATUS_FAILED);
            }
            let channels = state
                .setup
                .map_or(1, |s| s.channel_mask.count_ones() as usize);
            let fault = state
                .fault
                .filter(|&(after, _)| state.fills >= after)
                .map(|(_, fault)| fault);
            (
                self.fill_time(chunk.len(), channels, state.sample_rate),
                fault,
            )
        };

        match fault {
            Some(SimulatedFault::Timeout) => {
                thread::sleep(timeout);
                return Err(DigitizerError::Timeout(timeout));
            }
            Some(SimulatedFault::Status(status)) => {
                return check_status("wait_chunk_filled", status);
            }
            None => {}
        }

        if fill_time > timeout {
            thread::sleep(timeout);
            return Err(DigitizerError::Timeout(timeout));
        }
        if !fill_time.is_zero() {
            thread::sleep(fill_time);
        }

        let mut state = self.lock();
        if !state.running {
            // Aborted while the fill was in flight.
            return check_status("wait_chunk_filled", STATUS_FAILED);
        }
        if state.pending.front() != Some(&(chunk.as_ptr() as usize)) {
            return check_status("wait_chunk_filled", STATUS_BUFFER_NOT_READY);
        }
        state.pending.pop_front();

        let channels = state
            .setup
            .map_or(1, |s| s.channel_mask.count_ones() as usize);
        let sample_rate = state.sample_rate;
        state
            .generator
            .fill(chunk.as_mut_slice(), channels, sample_rate);
        #[cfg(feature = "simulation")]
        {
            if let Some(noise) = state.noise.as_mut() {
                noise.apply(chunk.as_mut_slice());
            }
        }
        state.fills += 1;
        Ok(())
    }

    fn abort_transfer(&self) -> Result<()> {
        let mut state = self.enter("abort_transfer")?;
        state.running = false;
        state.setup = None;
        state.pending.clear();
        state.aborts += 1;
        Ok(())
    }
}

/// Locator over a fixed set of simulated boards
#[derive(Default)]
pub struct SimulatedLocator {
    boards: HashMap<(u32, u32), Arc<SimulatedBoard>>,
}

impl SimulatedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(mut self, system_id: u32, board_id: u32, board: Arc<SimulatedBoard>) -> Self {
        self.boards.insert((system_id, board_id), board);
        self
    }
}

impl BoardLocator for SimulatedLocator {
    fn open(&self, system_id: u32, board_id: u32) -> Result<Arc<dyn Board>> {
        self.boards
            .get(&(system_id, board_id))
            .map(|board| Arc::clone(board) as Arc<dyn Board>)
            .ok_or(DigitizerError::DeviceNotFound {
                system_id,
                board_id,
            })
    }
}
