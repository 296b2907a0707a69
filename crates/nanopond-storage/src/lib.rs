//! CSV reporting sink for Nanopond.
//!
//! One row per report, 25 comma-separated fields, no header: clock, the
//! pond totals, the three interaction counters, sixteen per-opcode
//! execution frequencies, and the metabolism column. Population events
//! are forwarded to the log rather than the data stream.

use nanopond_core::{PondReport, PopulationEvent, ReportSink};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Buffered CSV writer implementing the core's report sink.
pub struct CsvReportSink<W: Write + Send> {
    writer: BufWriter<W>,
    rows_written: u64,
}

impl CsvReportSink<File> {
    /// Create (or truncate) a CSV file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl CsvReportSink<io::Stdout> {
    /// Sink writing rows to standard output, the classic arrangement.
    #[must_use]
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }
}

impl<W: Write + Send> CsvReportSink<W> {
    /// Wrap an arbitrary writer.
    #[must_use]
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            rows_written: 0,
        }
    }

    /// Rows emitted so far.
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush buffered rows to the underlying writer.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Unwrap the sink, flushing first.
    pub fn into_inner(self) -> Result<W, StorageError> {
        self.writer
            .into_inner()
            .map_err(|err| StorageError::Io(err.into_error()))
    }

    fn format_row(report: &PondReport) -> String {
        let mut row = format!(
            "{},{},{},{},{},{},{},{}",
            report.clock,
            report.total_energy,
            report.active_cells,
            report.viable_replicators,
            report.max_generation,
            report.viable_replaced,
            report.viable_killed,
            report.viable_shares,
        );
        for frequency in &report.instr_frequency {
            let _ = write!(row, ",{frequency:.4}");
        }
        let _ = write!(row, ",{:.4}", report.metabolism);
        row
    }
}

impl<W: Write + Send> ReportSink for CsvReportSink<W> {
    fn on_report(&mut self, report: &PondReport) {
        let row = Self::format_row(report);
        match writeln!(self.writer, "{row}").and_then(|()| self.writer.flush()) {
            Ok(()) => self.rows_written += 1,
            Err(err) => error!(clock = report.clock, %err, "failed to write report row"),
        }
    }

    fn on_population_event(&mut self, event: PopulationEvent) {
        match event {
            PopulationEvent::ReplicatorsEmerged => {
                info!(target: "nanopond::events", "viable replicators have appeared");
            }
            PopulationEvent::ReplicatorsExtinct => {
                info!(
                    target: "nanopond::events",
                    "viable replicators have gone extinct; a moment of silence"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> PondReport {
        let mut instr_frequency = [0.0f64; 16];
        for (index, frequency) in instr_frequency.iter_mut().enumerate() {
            *frequency = index as f64 * 0.25;
        }
        PondReport {
            clock: 200_000,
            total_energy: 123_456,
            active_cells: 789,
            viable_replicators: 4,
            max_generation: 11,
            viable_replaced: 1,
            viable_killed: 2,
            viable_shares: 3,
            instr_frequency,
            metabolism: 30.0,
        }
    }

    fn rows_from(sink: CsvReportSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner().expect("inner")).expect("utf8")
    }

    #[test]
    fn report_rows_have_exactly_25_fields() {
        let mut sink = CsvReportSink::from_writer(Vec::new());
        sink.on_report(&sample_report());
        let output = rows_from(sink);
        let row = output.trim_end();
        assert_eq!(row.split(',').count(), 25);
        assert_eq!(
            row,
            "200000,123456,789,4,11,1,2,3,\
             0.0000,0.2500,0.5000,0.7500,1.0000,1.2500,1.5000,1.7500,\
             2.0000,2.2500,2.5000,2.7500,3.0000,3.2500,3.5000,3.7500,\
             30.0000"
        );
    }

    #[test]
    fn empty_window_formats_zero_frequencies() {
        let report = PondReport {
            clock: 50,
            total_energy: 0,
            active_cells: 0,
            viable_replicators: 0,
            max_generation: 0,
            viable_replaced: 0,
            viable_killed: 0,
            viable_shares: 0,
            instr_frequency: [0.0; 16],
            metabolism: 0.0,
        };
        let mut sink = CsvReportSink::from_writer(Vec::new());
        sink.on_report(&report);
        let output = rows_from(sink);
        let fields: Vec<&str> = output.trim_end().split(',').collect();
        assert_eq!(fields[0], "50");
        assert!(fields[8..].iter().all(|field| *field == "0.0000"));
    }

    #[test]
    fn each_report_appends_one_row() {
        let mut sink = CsvReportSink::from_writer(Vec::new());
        sink.on_report(&sample_report());
        sink.on_report(&sample_report());
        assert_eq!(sink.rows_written(), 2);
        let output = rows_from(sink);
        assert_eq!(output.lines().count(), 2);
    }
}
