//! Capture session lifecycle: board programming, buffer sizing, starting and
//! stopping the capture thread, and pulling data out of the ring buffer.
//!
//! ```no_run
//! use digicap::acquisition::SweepReport;
//! use digicap::config::{ChannelSelection, DigitizerConfig};
//! use digicap::session::AcquisitionSession;
//! use digicap::simulation::{SimulatedLocator, SimulatedBoard, Waveform};
//! use std::sync::Arc;
//!
//! # fn main() -> digicap::Result<()> {
//! let board = Arc::new(SimulatedBoard::new(Waveform::Ramp));
//! let locator = SimulatedLocator::new().with_board(1, 1, board);
//!
//! let mut session = AcquisitionSession::open(
//!     &locator,
//!     1,
//!     1,
//!     DigitizerConfig::default(),
//!     |report: &SweepReport| println!("sweep {} done", report.sweep),
//! )?;
//! session.configure(1_000_000, 0.01, ChannelSelection::A)?;
//! session.start_capture()?;
//! let volts = session.pull_voltage_head(1024)?;
//! session.abort_capture()?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::acquisition::{AcquisitionLoop, DataReadyHandler, LoopExit, NoopHandler};
use crate::chunk::{BufferLayout, RawSample, StagingChunk};
use crate::config::{ChannelSelection, DigitizerConfig, SampleRate, validate_integration_time};
use crate::constants::{CHANNEL_A, CHANNEL_B, TRIGGER_TIMEOUT_TICK};
use crate::conversion::{ChannelScales, SampleConverter};
use crate::device::{Board, BoardLocator, ChannelInfo, TransferSetup};
use crate::error::{DigitizerError, Result};
use crate::ring_buffer::{SampleRingBuffer, Window};

/// Owned handle of a running capture thread
struct CaptureTask {
    handle: JoinHandle<LoopExit>,
}

pub struct AcquisitionSession {
    board: Arc<dyn Board>,
    config: DigitizerConfig,
    info: ChannelInfo,
    ring: Arc<SampleRingBuffer<RawSample>>,
    run_flag: Arc<AtomicBool>,
    task: Option<CaptureTask>,
    handler: Option<Box<dyn DataReadyHandler>>,
    scales: ChannelScales,
    converter: Option<Box<dyn SampleConverter>>,
    layout: Option<BufferLayout>,
    transfer_armed: bool,
    fault: Option<DigitizerError>,
}

impl AcquisitionSession {
    /// Open a board through `locator` and program it from `config`.
    pub fn open<H>(
        locator: &dyn BoardLocator,
        system_id: u32,
        board_id: u32,
        config: DigitizerConfig,
        handler: H,
    ) -> Result<Self>
    where
        H: DataReadyHandler + 'static,
    {
        let board = locator.open(system_id, board_id)?;
        log::info!("Opened board {} on system {}", board_id, system_id);
        Self::new(board, config, handler)
    }

    /// Program an already opened board from `config`.
    ///
    /// `handler` is invoked on the capture thread after every sweep.
    pub fn new<H>(board: Arc<dyn Board>, config: DigitizerConfig, handler: H) -> Result<Self>
    where
        H: DataReadyHandler + 'static,
    {
        config.validate()?;

        let info = board.channel_info()?;
        let ring = Arc::new(SampleRingBuffer::with_policy(
            config.ring.capacity,
            config.ring.overrun_policy,
        )?);
        let scales = ChannelScales::new(info.bits_per_sample, &config.enabled_inputs());

        let mut session = Self {
            board,
            config,
            info,
            ring,
            run_flag: Arc::new(AtomicBool::new(false)),
            task: None,
            handler: Some(Box::new(handler)),
            scales,
            converter: None,
            layout: None,
            transfer_armed: false,
            fault: None,
        };
        session.program_board()?;

        log::debug!(
            "Built new session ({} bits per sample, {} max samples per channel)",
            info.bits_per_sample,
            info.max_samples_per_channel
        );
        Ok(session)
    }

    /// Replace the default code-to-volts transform used by the voltage pulls.
    ///
    /// The converter is applied to every sample alike, whichever channel it
    /// came from.
    pub fn with_converter<C>(mut self, converter: C) -> Self
    where
        C: SampleConverter + 'static,
    {
        self.converter = Some(Box::new(converter));
        self
    }

    fn program_board(&mut self) -> Result<()> {
        let config = self.config.clone();

        self.log_channels(config.channels);
        self.board.set_capture_clock(config.sample_rate.as_hz())?;
        log::debug!("Sample rate set to {}", config.sample_rate);

        self.board.input_control(CHANNEL_A, &config.input_a)?;
        log::debug!("Channel A input control set");
        self.board.input_control(CHANNEL_B, &config.input_b)?;
        log::debug!("Channel B input control set");

        self.board.set_bw_limit(CHANNEL_A, config.bandwidth_limit)?;
        self.board
            .set_trigger_operation(&config.trigger.engine_j, &config.trigger.engine_k)?;
        self.board.set_external_trigger(
            config.trigger.external_coupling,
            config.trigger.external_range,
        )?;

        let ticks = trigger_timeout_ticks(config.trigger.timeout_secs);
        self.board.set_trigger_timeout(ticks)?;
        log::debug!("Trigger timeout set to {} ticks", ticks);

        self.board.configure_aux_io(&config.aux_io)?;
        log::debug!(
            "Integration time set to {} seconds",
            config.integration_time_secs
        );
        Ok(())
    }

    fn log_channels(&self, channels: ChannelSelection) {
        log::debug!("Using channel {}", channels);
    }

    /// Validate and apply sample rate, integration time and channel selection.
    ///
    /// Nothing is changed if any parameter is rejected.
    pub fn configure(
        &mut self,
        sample_rate: u32,
        integration_time_secs: f64,
        channels: ChannelSelection,
    ) -> Result<()> {
        self.ensure_idle()?;
        let rate = SampleRate::validated(sample_rate)?;
        validate_integration_time(integration_time_secs)?;

        self.board.set_capture_clock(rate.as_hz())?;
        self.config.sample_rate = rate;
        self.config.integration_time_secs = integration_time_secs;
        self.apply_channels(channels);

        log::debug!(
            "Configured {} on channel {} for {} s sweeps",
            rate,
            channels,
            integration_time_secs
        );
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.ensure_idle()?;
        let rate = SampleRate::validated(sample_rate)?;
        self.board.set_capture_clock(rate.as_hz())?;
        self.config.sample_rate = rate;
        log::debug!("Sample rate set to {}", rate);
        Ok(())
    }

    pub fn set_integration_time(&mut self, time_secs: f64) -> Result<()> {
        self.ensure_idle()?;
        validate_integration_time(time_secs)?;
        self.config.integration_time_secs = time_secs;
        log::debug!("Integration time set to {} seconds", time_secs);
        Ok(())
    }

    pub fn select_channels(&mut self, channels: ChannelSelection) -> Result<()> {
        self.ensure_idle()?;
        self.apply_channels(channels);
        Ok(())
    }

    fn apply_channels(&mut self, channels: ChannelSelection) {
        self.config.channels = channels;
        self.scales = ChannelScales::new(self.info.bits_per_sample, &self.config.enabled_inputs());
        self.log_channels(channels);
    }

    /// Size and allocate the staging chunks, arm the board and spawn the
    /// capture thread.
    pub fn start_capture(&mut self) -> Result<()> {
        self.ensure_idle()?;

        if let Some(stale) = self.fault.take() {
            log::warn!("Discarding unreported fault from previous capture: {}", stale);
        }
        if self.transfer_armed {
            // Left over from a capture whose thread died on its own.
            self.abort_transfer()?;
        }

        let layout = BufferLayout::compute(
            self.config.sample_rate.as_hz(),
            self.config.integration_time_secs,
            self.config.channels.count(),
            self.info.bits_per_sample,
            self.config.buffers_per_acquisition,
        )?;
        layout.check_board_limit(self.info.max_samples_per_channel)?;
        log::debug!(
            "Getting {} total samples per acquisition",
            layout.samples_per_acquisition
        );
        log::debug!("Using {} samples per buffer", layout.samples_per_buffer);
        log::debug!(
            "Using {} individual buffers",
            layout.buffers_per_acquisition
        );

        let mut chunks = StagingChunk::allocate(&layout, layout.buffers_per_acquisition)?;

        self.board.arm_continuous_transfer(&TransferSetup {
            channel_mask: self.config.channels.mask(),
            samples_per_chunk: layout.samples_per_buffer,
            chunk_count: layout.buffers_per_acquisition,
        })?;
        self.transfer_armed = true;

        if let Err(e) = self.submit_and_start(&mut chunks, &layout) {
            self.abort_after_failed_start();
            return Err(e);
        }

        let handler = self.handler.take().unwrap_or_else(|| Box::new(NoopHandler));
        let mut capture = AcquisitionLoop::new(
            Arc::clone(&self.board),
            Arc::clone(&self.ring),
            Arc::clone(&self.run_flag),
            chunks,
            handler,
            layout.bytes_per_buffer,
            self.config.wait_timeout(),
        );
        if self.config.realtime_priority
            && let Some(frames) = realtime_frames(layout.samples_per_buffer)
        {
            capture = capture.with_realtime_priority(frames, self.config.sample_rate.as_hz());
        }

        self.run_flag.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("digicap-capture".into())
            .spawn(move || capture.run());

        match spawned {
            Ok(handle) => {
                self.task = Some(CaptureTask { handle });
                self.layout = Some(layout);
                log::debug!("Capture started (ring buffer thread spinning)");
                Ok(())
            }
            Err(e) => {
                self.run_flag.store(false, Ordering::Release);
                log::warn!("Data-ready handler lost with the capture thread");
                self.handler = Some(Box::new(NoopHandler));
                self.abort_after_failed_start();
                Err(DigitizerError::ThreadSpawn(e.to_string()))
            }
        }
    }

    fn submit_and_start(&self, chunks: &mut [StagingChunk], layout: &BufferLayout) -> Result<()> {
        for chunk in chunks.iter_mut() {
            self.board.submit_chunk(chunk, layout.bytes_per_buffer)?;
        }
        log::debug!("Buffers to digitizer initialized");
        self.board.start_capture()
    }

    fn abort_after_failed_start(&mut self) {
        if let Err(e) = self.abort_transfer() {
            log::error!("Abort after failed start also failed: {}", e);
        }
    }

    fn abort_transfer(&mut self) -> Result<()> {
        self.transfer_armed = false;
        self.board.abort_transfer()
    }

    /// Stop the capture thread, wait for it to exit and abort outstanding
    /// transfers.
    ///
    /// The join waits for the current sweep to finish, which is bounded by
    /// the chunk count times the wait timeout. Teardown always runs to the
    /// end; the first error hit on the way is returned. Calling this while
    /// idle does nothing.
    pub fn abort_capture(&mut self) -> Result<()> {
        self.run_flag.store(false, Ordering::Release);

        let task = self.task.take();
        if task.is_none() && !self.transfer_armed {
            return Ok(());
        }
        log::debug!("Capture stopped");

        let mut first_error = None;

        if let Some(task) = task {
            match task.handle.join() {
                Ok(exit) => self.finish(exit),
                Err(panic) => {
                    let msg = panic_message(panic);
                    log::error!("Thread joining failed! {}", msg);
                    self.handler = Some(Box::new(NoopHandler));
                    first_error = Some(DigitizerError::ThreadJoin(msg));
                }
            }
            log::debug!("Ring buffer thread re-joined main thread");
        }

        if self.transfer_armed
            && let Err(e) = self.abort_transfer()
        {
            log::error!("Failed to abort transfer: {}", e);
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Collect a capture thread that has exited on its own.
    fn reap(&mut self) {
        let finished = self
            .task
            .as_ref()
            .is_some_and(|task| task.handle.is_finished());
        if !finished {
            return;
        }

        self.run_flag.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            match task.handle.join() {
                Ok(exit) => self.finish(exit),
                Err(panic) => {
                    let msg = panic_message(panic);
                    log::error!("Capture thread panicked: {}", msg);
                    self.handler = Some(Box::new(NoopHandler));
                    self.fault = Some(DigitizerError::ThreadJoin(msg));
                }
            }
        }
    }

    fn finish(&mut self, exit: LoopExit) {
        self.handler = Some(exit.handler);
        log::debug!(
            "Releasing {} staging buffers after {} sweeps",
            exit.chunks.len(),
            exit.sweeps
        );
        if let Err(e) = exit.result {
            self.fault = Some(e);
        }
    }

    fn ensure_idle(&mut self) -> Result<()> {
        self.reap();
        if self.task.is_some() {
            Err(DigitizerError::AlreadyRunning)
        } else {
            Ok(())
        }
    }

    /// Report a capture fault once, before any further reads.
    fn check_fault(&mut self) -> Result<()> {
        self.reap();
        match self.fault.take() {
            Some(e) => Err(DigitizerError::AcquisitionFailed(Box::new(e))),
            None => Ok(()),
        }
    }

    /// Return the fault that stopped the last capture, if not yet reported.
    pub fn take_fault(&mut self) -> Option<DigitizerError> {
        self.reap();
        self.fault.take()
    }

    fn head_window(&mut self, count: usize) -> Result<Window<RawSample>> {
        self.check_fault()?;
        let window = self.ring.head_window(count)?;
        log::debug!("Read {} samples from head of ring buffer", window.samples.len());
        Ok(window)
    }

    fn tail_window(&mut self, count: usize) -> Result<Window<RawSample>> {
        self.check_fault()?;
        let window = self.ring.tail_window(count)?;
        log::debug!("Read {} samples from tail of ring buffer", window.samples.len());
        Ok(window)
    }

    /// The `count` newest samples, oldest first; nothing is consumed.
    pub fn pull_raw_head(&mut self, count: usize) -> Result<Vec<RawSample>> {
        self.head_window(count).map(|w| w.samples)
    }

    /// Remove and return the `count` oldest resident samples.
    pub fn pull_raw_tail(&mut self, count: usize) -> Result<Vec<RawSample>> {
        self.tail_window(count).map(|w| w.samples)
    }

    /// With both channels enabled, samples alternate A, B and each one is
    /// scaled by its own channel's input range.
    pub fn pull_voltage_head(&mut self, count: usize) -> Result<Vec<f32>> {
        let window = self.head_window(count)?;
        Ok(self.convert(&window))
    }

    pub fn pull_voltage_tail(&mut self, count: usize) -> Result<Vec<f32>> {
        let window = self.tail_window(count)?;
        Ok(self.convert(&window))
    }

    fn convert(&self, window: &Window<RawSample>) -> Vec<f32> {
        match &self.converter {
            Some(converter) => converter.convert(&window.samples),
            None => self.scales.convert_from(window.start, &window.samples),
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.reap();
        self.task.is_some()
    }

    /// Layout of the current or most recent capture
    pub fn layout(&self) -> Option<&BufferLayout> {
        self.layout.as_ref()
    }

    pub fn config(&self) -> &DigitizerConfig {
        &self.config
    }

    pub fn channel_mask(&self) -> u32 {
        self.config.channels.mask()
    }

    pub fn channel_count(&self) -> usize {
        self.config.channels.count()
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.info.bits_per_sample
    }

    /// Samples currently resident in the ring buffer
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Shared handle to the ring buffer for readers on other threads
    pub fn ring(&self) -> Arc<SampleRingBuffer<RawSample>> {
        Arc::clone(&self.ring)
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if let Err(e) = self.abort_capture() {
            log::error!("Error stopping capture on drop: {}", e);
        }
        log::debug!("Destroyed session");
    }
}

fn trigger_timeout_ticks(timeout_secs: f64) -> u32 {
    let ticks = (timeout_secs / TRIGGER_TIMEOUT_TICK.as_secs_f64()).round();
    ticks.clamp(0.0, u32::MAX as f64) as u32
}

/// Frame count hint for real-time promotion, if it fits the API.
fn realtime_frames(samples_per_buffer: usize) -> Option<u32> {
    match u32::try_from(samples_per_buffer) {
        Ok(frames) => Some(frames),
        Err(_) => {
            log::warn!(
                "{} samples per buffer is too large for a real-time hint; staying at normal priority",
                samples_per_buffer
            );
            None
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
