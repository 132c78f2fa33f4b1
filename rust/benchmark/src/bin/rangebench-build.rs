//! Build a range-filtered index and report build time, peak thread count and
//! memory footprint.

use clap::Parser;
use rangebench::{run_build, BuildArgs};
use rangebench_error::BenchError;
use rangebench_index::RangeTreeEngine;

fn fail(error: &dyn BenchError) -> ! {
    let code = error.code();
    tracing::error!(code = code.name(), "{error}");
    eprintln!("Error: {error}");
    std::process::exit(code.exit_code());
}

fn main() {
    let config = match BuildArgs::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            rangebench_tracing::init_benchmark_tracing(&[]);
            fail(&e)
        }
    };
    rangebench_tracing::init_benchmark_tracing(&config.log_filters);
    let report = match run_build(&RangeTreeEngine::new(), &config) {
        Ok(report) => report,
        Err(e) => fail(&e),
    };
    if let Err(e) = report.write_report(std::io::stdout().lock()) {
        fail(&e);
    }
    if let Some(path) = &config.report_json {
        if let Err(e) = report.write_json(path) {
            fail(&e);
        }
    }
}
