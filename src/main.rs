use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, bounded};

use digicap::acquisition::ChannelNotifier;
use digicap::config::{ChannelSelection, DigitizerConfig, SampleRate};
use digicap::output::{OutputFormat, SweepOutput, VoltageSummary, create_formatter};
use digicap::ring_buffer::OverrunPolicy;
use digicap::session::AcquisitionSession;
use digicap::simulation::{Pacing, SimulatedBoard, SimulatedLocator, Waveform};
use digicap::{DigitizerError, SweepReport};

#[derive(Parser, Debug)]
#[command(name = "digicap")]
#[command(about = "Stream a digitizer into a ring buffer and report each sweep", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sample rate (e.g. "10M", "500k", "25MSPS")
    #[arg(short = 'r', long)]
    sample_rate: Option<SampleRate>,

    /// Seconds of signal per sweep of all staging buffers
    #[arg(short = 't', long)]
    integration_time: Option<f64>,

    /// Input channels to capture
    #[arg(long, value_enum)]
    channels: Option<ChannelSelection>,

    /// What a lapped tail read does
    #[arg(long, value_enum)]
    overrun_policy: Option<OverrunPolicy>,

    /// Stop after this many seconds
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Which end of the ring buffer to pull from after each sweep
    #[arg(long, value_enum, default_value = "head")]
    read: ReadEnd,

    /// Samples to pull after each sweep (default: one sweep's worth)
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Frequency of the simulated input tone in Hz
    #[arg(long, default_value_t = 1000.0)]
    tone_hz: f64,

    /// Amplitude of the simulated input tone (fraction of full scale)
    #[arg(long, default_value_t = 0.5)]
    amplitude: f64,

    /// Gaussian noise on the simulated input (fraction of full scale)
    #[cfg(feature = "simulation")]
    #[arg(long)]
    noise: Option<f64>,

    /// Request real-time priority for the capture thread
    #[arg(long)]
    realtime: bool,

    /// Increase output verbosity
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ReadEnd {
    /// Newest samples, leaving the buffer untouched
    Head,
    /// Oldest samples, draining the buffer in order
    Tail,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = build_config(&args)?;
    config.validate().context("Invalid configuration")?;

    let board = SimulatedBoard::new(Waveform::Sine {
        frequency_hz: args.tone_hz,
        amplitude: args.amplitude,
    })
    .with_pacing(Pacing::RealTime);
    #[cfg(feature = "simulation")]
    let board = match args.noise {
        Some(rms) => board.with_noise(rms, None)?,
        None => board,
    };
    let locator = SimulatedLocator::new().with_board(1, 1, Arc::new(board));

    let (sweep_tx, sweep_rx) = bounded(16);
    let mut session = AcquisitionSession::open(
        &locator,
        1,
        1,
        config.clone(),
        ChannelNotifier::new(sweep_tx),
    )?;

    eprintln!("=== digicap ===");
    eprintln!("Sample rate: {}", config.sample_rate);
    eprintln!("Channels: {}", config.channels);
    eprintln!("Integration time: {} s", config.integration_time_secs);
    eprintln!("Ring capacity: {} samples", config.ring.capacity);
    eprintln!();

    session.start_capture()?;
    let layout = *session
        .layout()
        .context("Capture started without a buffer layout")?;
    let pull_count = args.samples.unwrap_or(layout.chunk_len() * layout.buffers_per_acquisition);

    let formatter = create_formatter(args.format, args.verbose > 0);
    if let Some(header) = formatter.header() {
        println!("{}", header);
    }

    let result = run_report_loop(
        &mut session,
        &sweep_rx,
        args.read,
        pull_count,
        Duration::from_secs_f64(args.duration.max(0.0)),
        |output| println!("{}", formatter.format(output)),
    );

    session.abort_capture().context("Failed to stop capture")?;
    result
}

fn build_config(args: &Args) -> anyhow::Result<DigitizerConfig> {
    let mut config = match &args.config {
        Some(path) => DigitizerConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DigitizerConfig::default(),
    };

    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(t) = args.integration_time {
        config.integration_time_secs = t;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if let Some(policy) = args.overrun_policy {
        config.ring.overrun_policy = policy;
    }
    if args.realtime {
        config.realtime_priority = true;
    }
    Ok(config)
}

fn run_report_loop<F>(
    session: &mut AcquisitionSession,
    sweep_rx: &crossbeam_channel::Receiver<SweepReport>,
    read: ReadEnd,
    pull_count: usize,
    duration: Duration,
    mut emit: F,
) -> anyhow::Result<()>
where
    F: FnMut(&SweepOutput),
{
    let started = Instant::now();
    let poll = session.config().wait_timeout();

    while started.elapsed() < duration {
        let report = match sweep_rx.recv_timeout(poll) {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(fault) = session.take_fault() {
                    return Err(fault).context("Capture failed");
                }
                log::warn!("No sweep completed in {:?}", poll);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let pulled = match read {
            ReadEnd::Head => session.pull_voltage_head(pull_count),
            ReadEnd::Tail => session.pull_voltage_tail(pull_count),
        };

        let volts = match pulled {
            Ok(volts) => VoltageSummary::from_samples(&volts),
            Err(DigitizerError::InsufficientData { needed, available }) => {
                log::info!("Wanted {} samples, only {} buffered", needed, available);
                None
            }
            Err(DigitizerError::Overrun { lost }) => {
                log::warn!("Tail reader lapped: {} samples lost", lost);
                None
            }
            Err(e) => return Err(e).context("Failed to pull samples"),
        };

        emit(&SweepOutput { report, volts });
    }

    Ok(())
}
