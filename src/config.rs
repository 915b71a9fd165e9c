//! Configuration for a digitizer capture session.
//!
//! `DigitizerConfig::default()` reproduces the board's power-on programming:
//! channel A only, 10 MS/s, DC coupled ±400 mV inputs into 50 Ω, trigger
//! engine J on channel A, and a one second integration window.
//!
//! Configurations can also be read from TOML. Every field is optional:
//!
//! ```
//! use digicap::config::{ChannelSelection, DigitizerConfig};
//!
//! let config = DigitizerConfig::from_toml_str(
//!     r#"
//!     sample_rate = "50MSPS"
//!     integration_time_secs = 0.25
//!     channels = "ab"
//!
//!     [ring]
//!     capacity = 1048576
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.sample_rate.as_hz(), 50_000_000);
//! assert_eq!(config.channels, ChannelSelection::AB);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    CHANNEL_A, CHANNEL_B, DEFAULT_BUFFERS_PER_ACQUISITION, DEFAULT_RING_CAPACITY,
    DEFAULT_WAIT_TIMEOUT, SUPPORTED_SAMPLE_RATES,
};
use crate::error::{DigitizerError, Result};
use crate::ring_buffer::OverrunPolicy;

/// Sample clock rate in samples per second
///
/// # Parsing formats
/// - `10000000` or `10e6` - plain number
/// - `10M`, `500k` - SI suffix
/// - `10MSPS`, `500KSPS` - with the `SPS` unit
///
/// Parsing does not check the rate against the board's clock table; that
/// happens when the rate is applied.
///
/// # Example
/// ```
/// use digicap::config::SampleRate;
///
/// let rate: SampleRate = "25MSPS".parse().unwrap();
/// assert_eq!(rate.as_hz(), 25_000_000);
/// assert!(rate.is_supported());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RateRepr")]
pub struct SampleRate(u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum RateRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<RateRepr> for SampleRate {
    type Error = String;

    fn try_from(repr: RateRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            RateRepr::Number(hz) => Ok(Self(hz)),
            RateRepr::Text(s) => s.parse(),
        }
    }
}

impl SampleRate {
    pub fn from_hz(hz: u32) -> Self {
        Self(hz)
    }

    pub fn as_hz(&self) -> u32 {
        self.0
    }

    /// Whether the board clock can run at this rate
    pub fn is_supported(&self) -> bool {
        SUPPORTED_SAMPLE_RATES.contains(&self.0)
    }

    /// Return the rate if the board supports it, `UnsupportedRate` otherwise.
    pub fn validated(hz: u32) -> Result<Self> {
        let rate = Self(hz);
        if rate.is_supported() {
            Ok(rate)
        } else {
            Err(DigitizerError::UnsupportedRate(hz))
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self(10_000_000)
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            hz if hz >= 1_000_000 && hz % 1_000_000 == 0 => write!(f, "{}MSPS", hz / 1_000_000),
            hz if hz >= 1_000 && hz % 1_000 == 0 => write!(f, "{}KSPS", hz / 1_000),
            hz => write!(f, "{}SPS", hz),
        }
    }
}

impl FromStr for SampleRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let body = upper.strip_suffix("SPS").unwrap_or(&upper);

        let (num, scale) = if let Some(n) = body.strip_suffix('M') {
            (n, 1e6)
        } else if let Some(n) = body.strip_suffix('K') {
            (n, 1e3)
        } else {
            (body, 1.0)
        };

        let value: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid sample rate: {}", trimmed))?;
        let hz = value * scale;
        if !hz.is_finite() || hz <= 0.0 || hz > u32::MAX as f64 {
            return Err(format!("sample rate out of range: {}", trimmed));
        }
        if hz.fract() != 0.0 {
            return Err(format!("sample rate must be a whole number: {}", trimmed));
        }
        Ok(Self(hz as u32))
    }
}

/// Which analog inputs are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelection {
    /// Channel A only
    #[default]
    A,
    /// Channel B only
    B,
    /// Both channels, interleaved by the board
    AB,
}

impl ChannelSelection {
    pub fn mask(&self) -> u32 {
        match self {
            ChannelSelection::A => CHANNEL_A,
            ChannelSelection::B => CHANNEL_B,
            ChannelSelection::AB => CHANNEL_A | CHANNEL_B,
        }
    }

    pub fn count(&self) -> usize {
        self.mask().count_ones() as usize
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelection::A => write!(f, "A"),
            ChannelSelection::B => write!(f, "B"),
            ChannelSelection::AB => write!(f, "A & B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    Ac,
    #[default]
    Dc,
}

/// Full-scale input range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRange {
    Pm200Mv,
    #[default]
    Pm400Mv,
    Pm800Mv,
    Pm2V,
    Pm4V,
}

impl InputRange {
    /// Half-scale amplitude in volts
    pub fn volts(&self) -> f32 {
        match self {
            InputRange::Pm200Mv => 0.2,
            InputRange::Pm400Mv => 0.4,
            InputRange::Pm800Mv => 0.8,
            InputRange::Pm2V => 2.0,
            InputRange::Pm4V => 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impedance {
    #[default]
    Ohm50,
    Ohm1M,
}

/// Per-channel analog front end settings
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub coupling: Coupling,
    pub range: InputRange,
    pub impedance: Impedance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    ChannelA,
    ChannelB,
    External,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSlope {
    #[default]
    Positive,
    Negative,
}

/// One of the board's two trigger engines
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TriggerEngine {
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    /// Trigger level code (0-255, 128 is mid-scale)
    pub level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalTriggerRange {
    #[default]
    Etr5V,
    Etr1V,
}

/// Trigger programming
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Trigger engine J
    pub engine_j: TriggerEngine,
    /// Trigger engine K
    pub engine_k: TriggerEngine,
    pub external_coupling: Coupling,
    pub external_range: ExternalTriggerRange,
    /// Time after which the board triggers itself (0 waits forever)
    pub timeout_secs: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            engine_j: TriggerEngine {
                source: TriggerSource::ChannelA,
                slope: TriggerSlope::Positive,
                level: 150,
            },
            engine_k: TriggerEngine {
                source: TriggerSource::Disabled,
                slope: TriggerSlope::Positive,
                level: 128,
            },
            external_coupling: Coupling::Dc,
            external_range: ExternalTriggerRange::Etr5V,
            timeout_secs: 0.0,
        }
    }
}

/// What the AUX I/O connector does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxIoMode {
    /// Output a pulse on each trigger
    #[default]
    TriggerOut,
    /// Output the sample clock divided by the aux parameter
    PacerOut,
    /// Drive a static level from the aux parameter
    DigitalOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct AuxIoConfig {
    pub mode: AuxIoMode,
    pub parameter: u32,
}

/// Ring buffer sizing and overrun behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Capacity in raw samples
    pub capacity: usize,
    pub overrun_policy: OverrunPolicy,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            overrun_policy: OverrunPolicy::Overwrite,
        }
    }
}

/// Everything needed to program the board and run a capture
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DigitizerConfig {
    pub sample_rate: SampleRate,
    /// Seconds of signal collected per sweep of all staging chunks
    pub integration_time_secs: f64,
    pub channels: ChannelSelection,
    pub input_a: InputConfig,
    pub input_b: InputConfig,
    /// Enable the 20 MHz bandwidth limit filter on channel A
    pub bandwidth_limit: bool,
    pub trigger: TriggerConfig,
    pub aux_io: AuxIoConfig,
    pub ring: RingConfig,
    pub buffers_per_acquisition: usize,
    /// Bound on each wait for a chunk to fill
    pub wait_timeout_ms: u64,
    /// Try to run the capture thread at real-time priority
    pub realtime_priority: bool,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            integration_time_secs: 1.0,
            channels: ChannelSelection::A,
            input_a: InputConfig::default(),
            input_b: InputConfig::default(),
            bandwidth_limit: false,
            trigger: TriggerConfig::default(),
            aux_io: AuxIoConfig::default(),
            ring: RingConfig::default(),
            buffers_per_acquisition: DEFAULT_BUFFERS_PER_ACQUISITION,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT.as_millis() as u64,
            realtime_priority: false,
        }
    }
}

impl DigitizerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DigitizerError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DigitizerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Input settings of each enabled channel, in the order the board
    /// interleaves their samples.
    pub fn enabled_inputs(&self) -> Vec<InputConfig> {
        match self.channels {
            ChannelSelection::A => vec![self.input_a],
            ChannelSelection::B => vec![self.input_b],
            ChannelSelection::AB => vec![self.input_a, self.input_b],
        }
    }

    /// Check every field that the board cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_supported() {
            return Err(DigitizerError::UnsupportedRate(self.sample_rate.as_hz()));
        }
        validate_integration_time(self.integration_time_secs)?;
        if self.buffers_per_acquisition == 0 {
            return Err(DigitizerError::InvalidParameter(
                "buffers_per_acquisition must be at least 1".into(),
            ));
        }
        if self.ring.capacity == 0 {
            return Err(DigitizerError::InvalidParameter(
                "ring capacity must be non-zero".into(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(DigitizerError::InvalidParameter(
                "wait_timeout_ms must be non-zero".into(),
            ));
        }
        if !self.trigger.timeout_secs.is_finite() || self.trigger.timeout_secs < 0.0 {
            return Err(DigitizerError::InvalidParameter(format!(
                "trigger timeout of {} s is not valid",
                self.trigger.timeout_secs
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_integration_time(time_secs: f64) -> Result<()> {
    if time_secs.is_nan() || time_secs < 0.0 {
        return Err(DigitizerError::InvalidParameter(format!(
            "Requested integration time of {} is negative",
            time_secs
        )));
    }
    if time_secs.is_infinite() {
        return Err(DigitizerError::InvalidParameter(
            "integration time must be finite".into(),
        ));
    }
    Ok(())
}
