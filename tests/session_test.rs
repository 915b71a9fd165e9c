mod test_boards;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use approx::assert_relative_eq;

use digicap::acquisition::{NoopHandler, SweepReport};
use digicap::config::{ChannelSelection, InputRange};
use digicap::device::ChannelInfo;
use digicap::session::AcquisitionSession;
use digicap::simulation::{SimulatedBoard, SimulatedFault, SimulatedLocator, Waveform};
use digicap::DigitizerError;

use test_boards::{assert_contiguous_ramp, ramp_board, small_config, wait_until};

const PATIENCE: Duration = Duration::from_secs(5);

#[test]
fn test_open_unknown_board() {
    let locator = SimulatedLocator::new().with_board(1, 1, ramp_board());
    let result = AcquisitionSession::open(&locator, 1, 7, small_config(), NoopHandler);
    assert!(matches!(
        result,
        Err(DigitizerError::DeviceNotFound {
            system_id: 1,
            board_id: 7
        })
    ));
}

#[test]
fn test_configure_rejects_unsupported_rate() {
    let mut session = AcquisitionSession::new(ramp_board(), small_config(), NoopHandler).unwrap();
    assert!(matches!(
        session.configure(12345, 0.1, ChannelSelection::A),
        Err(DigitizerError::UnsupportedRate(12345))
    ));
}

#[test]
fn test_configure_rejects_negative_integration_time() {
    let mut session = AcquisitionSession::new(ramp_board(), small_config(), NoopHandler).unwrap();
    assert!(matches!(
        session.configure(1_000_000, -1.0, ChannelSelection::A),
        Err(DigitizerError::InvalidParameter(_))
    ));
    assert!(matches!(
        session.set_integration_time(f64::NAN),
        Err(DigitizerError::InvalidParameter(_))
    ));
}

#[test]
fn test_device_error_during_programming() {
    let board = ramp_board();
    board.fail_operation("set_trigger_operation", 0x205);
    let result = AcquisitionSession::new(board, small_config(), NoopHandler);
    assert!(matches!(
        result,
        Err(DigitizerError::Device {
            operation: "set_trigger_operation",
            status: 0x205
        })
    ));
}

#[test]
fn test_double_start_fails() {
    let board = ramp_board();
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();

    session.start_capture().unwrap();
    assert!(matches!(
        session.start_capture(),
        Err(DigitizerError::AlreadyRunning)
    ));
    assert!(matches!(
        session.configure(1_000_000, 0.1, ChannelSelection::B),
        Err(DigitizerError::AlreadyRunning)
    ));

    session.abort_capture().unwrap();
    assert!(!session.is_running());
    assert_eq!(board.abort_count(), 1);
    assert!(!board.is_running());
}

#[test]
fn test_start_programs_transfer() {
    let board = ramp_board();
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();
    session.start_capture().unwrap();

    let layout = *session.layout().unwrap();
    assert_eq!(layout.samples_per_buffer, 256);
    assert_eq!(layout.buffers_per_acquisition, 4);
    assert_eq!(layout.bytes_per_buffer, 512);

    let setup = board.transfer_setup().unwrap();
    assert_eq!(setup.channel_mask, 1);
    assert_eq!(setup.samples_per_chunk, 256);
    assert_eq!(setup.chunk_count, 4);

    let calls = board.calls();
    let arm = calls
        .iter()
        .position(|&c| c == "arm_continuous_transfer")
        .unwrap();
    let start = calls.iter().position(|&c| c == "start_capture").unwrap();
    assert!(arm < start);
    assert_eq!(
        calls[arm + 1..start]
            .iter()
            .filter(|&&c| c == "submit_chunk")
            .count(),
        4
    );

    session.abort_capture().unwrap();
}

#[test]
fn test_captured_data_is_ordered() {
    let mut session = AcquisitionSession::new(ramp_board(), small_config(), NoopHandler).unwrap();
    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || session.buffered() >= 4096));
    session.abort_capture().unwrap();

    let head = session.pull_raw_head(1024).unwrap();
    assert_contiguous_ramp(&head);
    // Head reads do not consume.
    assert_eq!(session.pull_raw_head(1024).unwrap(), head);

    let resident = session.buffered();
    let tail = session.pull_raw_tail(resident).unwrap();
    assert_contiguous_ramp(&tail);
    assert_eq!(&tail[resident - 1024..], &head[..]);
    assert_eq!(session.buffered(), 0);

    assert!(matches!(
        session.pull_raw_tail(1),
        Err(DigitizerError::InsufficientData {
            needed: 1,
            available: 0
        })
    ));
}

#[test]
fn test_ring_never_exceeds_capacity_while_running() {
    let mut config = small_config();
    config.ring.capacity = 3000;
    let mut session = AcquisitionSession::new(ramp_board(), config, NoopHandler).unwrap();
    let ring = session.ring();

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || ring.total_inserted() > 20_000));
    for _ in 0..100 {
        assert!(ring.len() <= 3000);
    }
    session.abort_capture().unwrap();

    assert_eq!(ring.len(), 3000);
    assert!(ring.dropped() > 0);
    assert_contiguous_ramp(&ring.tail_read(3000).unwrap());
}

#[test]
fn test_data_ready_called_once_per_sweep() {
    let sweeps = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&sweeps);
    let handler = move |report: &SweepReport| {
        assert_eq!(report.samples_inserted, 1024);
        counter.fetch_add(1, Ordering::SeqCst);
    };

    let board = ramp_board();
    let mut session = AcquisitionSession::new(board.clone(), small_config(), handler).unwrap();
    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || sweeps.load(Ordering::SeqCst) >= 5));
    session.abort_capture().unwrap();

    let count = sweeps.load(Ordering::SeqCst);
    assert_eq!(board.fills(), count * 4);

    // The handler comes back after a stop and keeps counting.
    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || sweeps.load(Ordering::SeqCst) > count));
    session.abort_capture().unwrap();
    assert_eq!(board.abort_count(), 2);
}

#[test]
fn test_loop_fault_is_reported_once() {
    let board = ramp_board();
    board.inject_fault(6, SimulatedFault::Status(0x250));
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || !session.is_running()));

    match session.pull_raw_tail(10) {
        Err(DigitizerError::AcquisitionFailed(cause)) => {
            assert!(matches!(*cause, DigitizerError::Device { status: 0x250, .. }));
        }
        other => panic!("expected acquisition failure, got {:?}", other),
    }

    // Data inserted before the fault is still readable.
    let data = session.pull_raw_tail(6 * 256).unwrap();
    assert_contiguous_ramp(&data);
    assert_eq!(data[0], 0);

    // Teardown still aborts the transfer of the dead capture.
    session.abort_capture().unwrap();
    assert_eq!(board.abort_count(), 1);
}

#[test]
fn test_timeout_stops_capture() {
    let board = ramp_board();
    board.inject_fault(0, SimulatedFault::Timeout);
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || !session.is_running()));
    assert!(matches!(session.take_fault(), Some(DigitizerError::Timeout(_))));
    assert!(session.take_fault().is_none());

    // Restarting after a fault is allowed once the caller decides to.
    board.clear_faults();
    session.start_capture().unwrap();
    assert!(session.is_running());
    session.abort_capture().unwrap();
    assert_eq!(board.abort_count(), 2);
}

#[test]
fn test_failed_start_aborts_transfer() {
    let board = ramp_board();
    board.fail_operation("start_capture", 0x22);
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();

    assert!(matches!(
        session.start_capture(),
        Err(DigitizerError::Device {
            operation: "start_capture",
            status: 0x22
        })
    ));
    assert!(!session.is_running());
    assert_eq!(board.abort_count(), 1);
    assert_eq!(board.pending_chunks(), 0);
}

#[test]
fn test_abort_failure_is_reported() {
    let board = ramp_board();
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();
    session.start_capture().unwrap();

    board.fail_operation("abort_transfer", 0x30);
    assert!(matches!(
        session.abort_capture(),
        Err(DigitizerError::Device {
            operation: "abort_transfer",
            ..
        })
    ));
    assert!(!session.is_running());

    // Nothing left to tear down.
    session.abort_capture().unwrap();
}

#[test]
fn test_integration_too_short_for_one_buffer() {
    let mut session = AcquisitionSession::new(ramp_board(), small_config(), NoopHandler).unwrap();
    session.configure(1_000, 0.01, ChannelSelection::A).unwrap();
    assert!(matches!(
        session.start_capture(),
        Err(DigitizerError::InvalidParameter(_))
    ));
    assert!(!session.is_running());
}

#[test]
fn test_voltage_pulls_use_input_range() {
    let board = Arc::new(SimulatedBoard::new(Waveform::Constant(u16::MAX)));
    let mut config = small_config();
    config.input_b.range = InputRange::Pm2V;
    let mut session = AcquisitionSession::new(board, config, NoopHandler).unwrap();

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || session.buffered() >= 512));
    session.abort_capture().unwrap();

    let volts = session.pull_voltage_head(256).unwrap();
    assert_eq!(volts.len(), 256);
    assert!(volts.iter().all(|&v| (v - 0.4).abs() < 1e-5));

    session
        .configure(1_000_000, 0.001024, ChannelSelection::B)
        .unwrap();
    let volts = session.pull_voltage_tail(256).unwrap();
    assert_relative_eq!(volts[0], 2.0, epsilon = 1e-5);
}

#[test]
fn test_custom_converter() {
    let board = Arc::new(SimulatedBoard::new(Waveform::Constant(100)));
    let mut session = AcquisitionSession::new(board, small_config(), NoopHandler)
        .unwrap()
        .with_converter(LinearCodes);

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || session.buffered() >= 256));
    session.abort_capture().unwrap();

    let values = session.pull_voltage_tail(4).unwrap();
    assert_eq!(values, vec![50.0; 4]);
}

struct LinearCodes;

impl digicap::conversion::SampleConverter for LinearCodes {
    fn to_physical(&self, raw: u16) -> f32 {
        raw as f32 * 0.5
    }
}

#[test]
fn test_dual_channel_chunks_hold_both_channels() {
    let board = ramp_board();
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();
    session
        .configure(1_000_000, 0.001024, ChannelSelection::AB)
        .unwrap();
    session.start_capture().unwrap();

    let layout = *session.layout().unwrap();
    assert_eq!(layout.channel_count, 2);
    assert_eq!(layout.chunk_len(), 512);
    assert_eq!(layout.bytes_per_buffer, 1024);
    assert_eq!(board.transfer_setup().unwrap().channel_mask, 3);

    assert!(wait_until(PATIENCE, || session.buffered() >= 2048));
    session.abort_capture().unwrap();
    assert_contiguous_ramp(&session.pull_raw_head(2048).unwrap());
}

#[test]
fn test_drop_stops_capture() {
    let board = ramp_board();
    {
        let mut session =
            AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();
        session.start_capture().unwrap();
        assert!(wait_until(PATIENCE, || board.fills() > 0));
    }
    assert!(!board.is_running());
    assert_eq!(board.abort_count(), 1);
}

#[test]
fn test_huge_integration_time_is_rejected() {
    let board = ramp_board();
    let mut config = small_config();
    config.buffers_per_acquisition = 1;
    let mut session = AcquisitionSession::new(board.clone(), config, NoopHandler).unwrap();

    session
        .configure(180_000_000, 1e12, ChannelSelection::A)
        .unwrap();
    assert!(matches!(
        session.start_capture(),
        Err(DigitizerError::InvalidParameter(_))
    ));
    assert!(!session.is_running());
    assert!(!board.calls().contains(&"arm_continuous_transfer"));
}

#[test]
fn test_buffer_larger_than_board_limit_is_rejected() {
    let board = Arc::new(SimulatedBoard::new(Waveform::Ramp).with_channel_info(ChannelInfo {
        max_samples_per_channel: 128,
        bits_per_sample: 16,
    }));
    let mut session = AcquisitionSession::new(board.clone(), small_config(), NoopHandler).unwrap();

    assert!(matches!(
        session.start_capture(),
        Err(DigitizerError::InvalidParameter(_))
    ));
    assert!(!board.calls().contains(&"arm_continuous_transfer"));

    // 0.000512 s at 1 MS/s over 4 buffers is 128 samples per buffer.
    session
        .configure(1_000_000, 0.000512, ChannelSelection::A)
        .unwrap();
    session.start_capture().unwrap();
    session.abort_capture().unwrap();
}

#[test]
fn test_dual_channel_voltages_use_each_channel_range() {
    let board = Arc::new(SimulatedBoard::new(Waveform::Constant(u16::MAX)));
    let mut config = small_config();
    config.channels = ChannelSelection::AB;
    config.input_b.range = InputRange::Pm2V;
    // Odd capacity, so overwrites leave the oldest sample on either channel.
    config.ring.capacity = 3001;
    let mut session = AcquisitionSession::new(board, config, NoopHandler).unwrap();
    let ring = session.ring();

    session.start_capture().unwrap();
    assert!(wait_until(PATIENCE, || ring.total_inserted() > 6002));
    session.abort_capture().unwrap();
    assert_eq!(ring.total_inserted() % 2, 0);

    let expect = |volts: Vec<f32>, ranges: &[f32]| {
        assert_eq!(volts.len(), ranges.len());
        for (v, r) in volts.iter().zip(ranges) {
            assert_relative_eq!(*v, *r, epsilon = 1e-5);
        }
    };

    expect(session.pull_voltage_head(4).unwrap(), &[0.4, 2.0, 0.4, 2.0]);
    // 3001 resident samples ending on channel B start on channel B.
    expect(session.pull_voltage_tail(3).unwrap(), &[2.0, 0.4, 2.0]);
    expect(session.pull_voltage_tail(2).unwrap(), &[0.4, 2.0]);
}
