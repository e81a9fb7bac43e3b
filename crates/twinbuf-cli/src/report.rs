//! Benchmark report output

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use twinbuf_types::{BufferSize, Method, TransferKind, TrialSummary};

/// First line of every CSV report
pub const CSV_HEADER: &str = "Method, Mean (ms), Stddev (ms)";

/// Report label of a method, with the buffer size for buffered engines
pub fn label(method: &Method, size: Option<BufferSize>) -> String {
    match size {
        Some(size) => format!("{} {} Kb", method.name(), size.kib()),
        None => method.name(),
    }
}

/// Complete JSON output of one harness run
#[derive(Debug, Serialize)]
pub struct BenchmarkReport {
    /// Run metadata
    pub metadata: ReportMetadata,
    /// One entry per method and buffer size that completed
    pub results: Vec<TrialSummary>,
}

/// Run metadata
#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    /// twinbuf version
    pub version: String,
    /// Transfer kind under test
    pub operation: TransferKind,
    /// Input file or written byte count
    pub target: String,
    /// Timed repetitions per entry
    pub trials: u32,
    /// When the run finished
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkReport {
    /// Wrap finished results with run metadata stamped now
    pub fn new(
        operation: TransferKind,
        target: impl Into<String>,
        trials: u32,
        results: Vec<TrialSummary>,
    ) -> Self {
        Self {
            metadata: ReportMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation,
                target: target.into(),
                trials,
                timestamp: Utc::now(),
            },
            results,
        }
    }

    /// Write the CSV form: the header then one line per result
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "{}", CSV_HEADER)?;
        for summary in &self.results {
            writeln!(out, "{}", summary.csv_line())?;
        }
        out.flush()
    }

    /// Write the pretty-printed JSON form
    pub fn write_json<W: Write>(&self, mut out: W) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)?;
        Ok(())
    }
}
