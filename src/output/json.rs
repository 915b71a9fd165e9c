use serde::Serialize;

use super::{Formatter, SweepOutput, VoltageSummary, iso8601_timestamp};

pub struct JsonFormatter;

#[derive(Serialize)]
struct JsonLine<'a> {
    ts: String,
    sweep: u64,
    samples: usize,
    buffered: usize,
    total: u64,
    dropped: u64,
    volts: Option<&'a VoltageSummary>,
}

impl Formatter for JsonFormatter {
    fn format(&self, output: &SweepOutput) -> String {
        let line = JsonLine {
            ts: iso8601_timestamp(),
            sweep: output.report.sweep,
            samples: output.report.samples_inserted,
            buffered: output.report.buffered,
            total: output.report.total_inserted,
            dropped: output.report.dropped,
            volts: output.volts.as_ref(),
        };
        serde_json::to_string(&line).unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
    }
}
