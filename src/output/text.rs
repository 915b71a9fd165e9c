use super::{Formatter, SweepOutput};

pub struct TextFormatter {
    verbose: bool,
}

impl TextFormatter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Formatter for TextFormatter {
    fn format(&self, output: &SweepOutput) -> String {
        let report = &output.report;
        let mut line = format!(
            "Sweep {:>5}: {:>9} samples, buffered {:>10}",
            report.sweep, report.samples_inserted, report.buffered
        );
        if let Some(v) = output.volts {
            line.push_str(&format!(
                "  mean {:>+8.4} V  rms dev {:>7.4} V",
                v.mean, v.std_dev
            ));
            if self.verbose {
                line.push_str(&format!("  [min {:>+7.4}, max {:>+7.4}]", v.min, v.max));
            }
        }
        if self.verbose {
            line.push_str(&format!(
                "  total {} dropped {}",
                report.total_inserted, report.dropped
            ));
        }
        line
    }
}
