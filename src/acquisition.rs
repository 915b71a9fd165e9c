//! The capture loop that moves filled DMA chunks into the ring buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use audio_thread_priority::RtPriorityHandle;
use crossbeam_channel::{Sender, TrySendError};

use crate::chunk::{RawSample, StagingChunk};
use crate::device::Board;
use crate::error::Result;
use crate::ring_buffer::SampleRingBuffer;

/// Summary passed to the data-ready handler after each sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Zero-based index of the completed sweep
    pub sweep: u64,
    /// Raw samples inserted during this sweep
    pub samples_inserted: usize,
    /// Samples resident in the ring after the sweep
    pub buffered: usize,
    pub total_inserted: u64,
    /// Samples overwritten before a tail read reached them
    pub dropped: u64,
}

/// Called on the capture thread once per completed sweep.
///
/// Implementations must return quickly: the next chunk is not drained until
/// the handler returns.
pub trait DataReadyHandler: Send {
    fn on_data_ready(&mut self, report: &SweepReport);
}

impl<F> DataReadyHandler for F
where
    F: FnMut(&SweepReport) + Send,
{
    fn on_data_ready(&mut self, report: &SweepReport) {
        self(report)
    }
}

/// Handler that ignores every sweep
pub struct NoopHandler;

impl DataReadyHandler for NoopHandler {
    fn on_data_ready(&mut self, _report: &SweepReport) {}
}

/// Forwards sweep reports over a channel without ever blocking the capture
/// thread. Reports are discarded while the channel is full.
pub struct ChannelNotifier {
    tx: Sender<SweepReport>,
    disconnected: bool,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<SweepReport>) -> Self {
        Self {
            tx,
            disconnected: false,
        }
    }
}

impl DataReadyHandler for ChannelNotifier {
    fn on_data_ready(&mut self, report: &SweepReport) {
        match self.tx.try_send(*report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("Sweep #{} notification dropped (receiver busy)", report.sweep);
            }
            Err(TrySendError::Disconnected(_)) => {
                if !self.disconnected {
                    log::warn!("Sweep receiver dropped");
                    self.disconnected = true;
                }
            }
        }
    }
}

/// State handed back when the loop exits so the session can restart later
pub struct LoopExit {
    pub chunks: Vec<StagingChunk>,
    pub handler: Box<dyn DataReadyHandler>,
    pub sweeps: u64,
    pub result: Result<()>,
}

/// Drains staging chunks into the ring buffer in submission order.
///
/// The loop owns the chunks for the life of a capture. The run flag is
/// checked once per sweep, so stopping takes at most one sweep.
pub struct AcquisitionLoop {
    board: Arc<dyn Board>,
    ring: Arc<SampleRingBuffer<RawSample>>,
    run_flag: Arc<AtomicBool>,
    chunks: Vec<StagingChunk>,
    handler: Box<dyn DataReadyHandler>,
    bytes_per_buffer: usize,
    wait_timeout: Duration,
    realtime: Option<(u32, u32)>,
}

impl AcquisitionLoop {
    /// Create a loop over `chunks`, all of which must already be submitted.
    pub fn new(
        board: Arc<dyn Board>,
        ring: Arc<SampleRingBuffer<RawSample>>,
        run_flag: Arc<AtomicBool>,
        chunks: Vec<StagingChunk>,
        handler: Box<dyn DataReadyHandler>,
        bytes_per_buffer: usize,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            board,
            ring,
            run_flag,
            chunks,
            handler,
            bytes_per_buffer,
            wait_timeout,
            realtime: None,
        }
    }

    /// Request real-time scheduling for the capture thread, sized for
    /// chunks of `samples_per_chunk` at `sample_rate`.
    pub fn with_realtime_priority(mut self, samples_per_chunk: u32, sample_rate: u32) -> Self {
        self.realtime = Some((samples_per_chunk, sample_rate));
        self
    }

    /// Run until the run flag clears or the board reports an error.
    pub fn run(mut self) -> LoopExit {
        let rt_handle = self.promote();

        let mut sweeps = 0;
        let result = self.run_sweeps(&mut sweeps);

        match &result {
            Ok(()) => log::debug!("Capture loop stopped after {} sweeps", sweeps),
            Err(e) => log::error!("Capture loop failed after {} sweeps: {}", sweeps, e),
        }

        if let Some(handle) = rt_handle
            && let Err(e) = audio_thread_priority::demote_current_thread_from_real_time(handle)
        {
            log::warn!("Could not restore thread priority: {}", e);
        }

        LoopExit {
            chunks: self.chunks,
            handler: self.handler,
            sweeps,
            result,
        }
    }

    fn promote(&self) -> Option<RtPriorityHandle> {
        let (frames, rate) = self.realtime?;
        match audio_thread_priority::promote_current_thread_to_real_time(frames, rate) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Could not set real-time priority: {}", e);
                None
            }
        }
    }

    fn run_sweeps(&mut self, sweeps: &mut u64) -> Result<()> {
        while self.run_flag.load(Ordering::Acquire) {
            let mut inserted = 0;

            for (i, chunk) in self.chunks.iter_mut().enumerate() {
                log::trace!("Dumping chunk #{}", i);

                self.board.wait_chunk_filled(chunk, self.wait_timeout)?;
                self.ring.tail_insert(chunk.as_slice());
                inserted += chunk.len();
                self.board.submit_chunk(chunk, self.bytes_per_buffer)?;
            }

            let stats = self.ring.stats();
            let report = SweepReport {
                sweep: *sweeps,
                samples_inserted: inserted,
                buffered: stats.len,
                total_inserted: stats.total_inserted,
                dropped: stats.dropped,
            };
            *sweeps += 1;
            self.handler.on_data_ready(&report);
        }
        Ok(())
    }
}
