pub mod init_tracer;

pub use init_tracer::{init_benchmark_tracing, LogFilter, LogFilterLevel};
