//! Resource usage of the benchmark process: a background sampler for the
//! peak OS thread count and a one-shot memory footprint report.

mod memory;
mod threads;

pub use memory::MemoryFootprint;
pub use threads::{
    current_thread_count, parse_thread_count, MonitorHandle, DEFAULT_SAMPLE_INTERVAL,
    INITIAL_PEAK,
};

use rangebench_error::{BenchError, ErrorCodes};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to spawn the thread count sampler: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BenchError for MonitorError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}
