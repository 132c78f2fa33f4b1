use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rangebench_error::{BenchError, ErrorCodes};
use serde::Serialize;
use thiserror::Error;

use crate::monitor::MemoryFootprint;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Unable to write report to `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unable to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BenchError for ReportError {
    fn code(&self) -> ErrorCodes {
        match self {
            ReportError::Write { source, .. } => source.code(),
            ReportError::Encode(_) => ErrorCodes::Internal,
        }
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ReportError> {
    let write_error = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer).map_err(write_error)?;
    writer.flush().map_err(write_error)
}

/// Pooled recall: hits over all queries divided by `queries * k`. Undefined
/// when no query was processed.
pub fn recall(true_positives: usize, queries: usize, k: usize) -> Option<f64> {
    let possible = queries.checked_mul(k)?;
    if possible == 0 {
        return None;
    }
    Some(true_positives as f64 / possible as f64)
}

/// Queries per second over the whole batch. Undefined for an empty batch or a
/// zero-length timing.
pub fn qps(queries: usize, elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    if queries == 0 || seconds <= 0.0 {
        return None;
    }
    Some(queries as f64 / seconds)
}

struct Metric(Option<f64>);

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}"),
            None => f.write_str("undefined"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildReport {
    pub build_time_s: f64,
    pub peak_thread_count: usize,
    pub vectors: usize,
    pub memory: MemoryFootprint,
}

impl BuildReport {
    pub fn write_report<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "Index construction completed.")?;
        writeln!(writer, "Build time (s): {}", self.build_time_s)?;
        writeln!(writer, "Peak thread count: {}", self.peak_thread_count)?;
        self.memory.write_report(&mut writer)?;
        writer.flush()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        write_json(self, path)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchReport {
    pub query_time_s: f64,
    pub peak_thread_count: usize,
    pub queries_processed: usize,
    pub true_positives: usize,
    pub k: usize,
    pub qps: Option<f64>,
    pub recall: Option<f64>,
    pub memory: MemoryFootprint,
}

impl SearchReport {
    pub fn write_report<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "Query execution completed.")?;
        writeln!(writer, "Query time (s): {}", self.query_time_s)?;
        writeln!(writer, "Peak thread count: {}", self.peak_thread_count)?;
        writeln!(writer, "QPS: {}", Metric(self.qps))?;
        writeln!(writer, "Recall: {}", Metric(self.recall))?;
        self.memory.write_report(&mut writer)?;
        writer.flush()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        write_json(self, path)
    }
}
