mod csv;
mod json;
mod text;

use chrono::Utc;
use rolling_stats::Stats;
use serde::Serialize;

pub use self::csv::CsvFormatter;
pub use self::json::JsonFormatter;
pub use self::text::TextFormatter;

use crate::acquisition::SweepReport;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// Summary of the voltages pulled after one sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoltageSummary {
    pub count: usize,
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

impl VoltageSummary {
    pub fn from_samples(volts: &[f32]) -> Option<Self> {
        if volts.is_empty() {
            return None;
        }
        let mut stats: Stats<f32> = Stats::new();
        for &v in volts {
            stats.update(v);
        }
        Some(Self {
            count: stats.count,
            mean: stats.mean,
            std_dev: stats.std_dev,
            min: stats.min,
            max: stats.max,
        })
    }
}

/// One line of CLI output
pub struct SweepOutput {
    pub report: SweepReport,
    pub volts: Option<VoltageSummary>,
}

pub trait Formatter: Send {
    fn format(&self, output: &SweepOutput) -> String;

    fn header(&self) -> Option<&'static str> {
        None
    }
}

pub fn create_formatter(format: OutputFormat, verbose: bool) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(verbose)),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

pub fn iso8601_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
