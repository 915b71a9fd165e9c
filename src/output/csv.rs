use super::{Formatter, SweepOutput, iso8601_timestamp};

pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format(&self, output: &SweepOutput) -> String {
        let report = &output.report;
        let volts = output.volts.map_or(",,,,".to_string(), |v| {
            format!(
                "{},{:.6},{:.6},{:.6},{:.6}",
                v.count, v.mean, v.std_dev, v.min, v.max
            )
        });
        format!(
            "{},{},{},{},{},{},{}",
            iso8601_timestamp(),
            report.sweep,
            report.samples_inserted,
            report.buffered,
            report.total_inserted,
            report.dropped,
            volts
        )
    }

    fn header(&self) -> Option<&'static str> {
        Some("ts,sweep,samples,buffered,total,dropped,count,mean_v,std_v,min_v,max_v")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_output;

    #[test]
    fn test_csv_column_count_matches_header() {
        let formatter = CsvFormatter;
        let header_cols = formatter.header().unwrap().split(',').count();

        let mut output = sample_output();
        assert_eq!(formatter.format(&output).split(',').count(), header_cols);

        output.volts = None;
        assert_eq!(formatter.format(&output).split(',').count(), header_cols);
    }
}
