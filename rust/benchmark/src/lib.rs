//! Benchmark harness for range-filtered approximate nearest neighbor indexes.
//!
//! `rangebench-build` builds and persists an index over an `.fvecs` dataset;
//! `rangebench-search` runs a workload of range-restricted top-K queries against
//! it and reports QPS, recall, peak thread count and memory footprint.

pub mod config;
pub mod datasets;
pub mod evaluation;
pub mod monitor;
pub mod report;

pub use config::{BuildArgs, BuildConfig, ConfigError, SearchArgs, SearchConfig, QUERY_K};
pub use evaluation::{evaluate, run_build, run_search, EvaluationError, QueryTally, Workload};
pub use report::{BuildReport, ReportError, SearchReport};
