//! Build and search runs: load inputs, drive an engine, time it, and score
//! its answers against groundtruth.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use rangebench_error::{BenchError, ErrorCodes};
use rangebench_index::{RangeIndexEngine, SearchParams};
use thiserror::Error;
use tracing::instrument;

use crate::config::{BuildConfig, ConfigError, SearchConfig};
use crate::datasets::id_mapping::{IdMapping, IdMappingError};
use crate::datasets::text::{read_int_rows, read_range_pairs, LineFormatError};
use crate::datasets::vecs::{read_vecs_with_policy, OpenPolicy, VecsError};
use crate::datasets::GroundtruthFormat;
use crate::monitor::{current_thread_count, MemoryFootprint, MonitorError, MonitorHandle};
use crate::report::{self, BuildReport, SearchReport};

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vecs(#[from] VecsError),
    #[error(transparent)]
    LineFormat(#[from] LineFormatError),
    #[error(transparent)]
    IdMapping(#[from] IdMappingError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("Number of {what} does not match number of queries ({found} vs {expected})")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Id mapping holds {mapping} entries but the index holds {index} vectors")]
    MappingSize { mapping: usize, index: usize },
    #[error("Index engine error: {0}")]
    Engine(Box<dyn BenchError>),
}

impl BenchError for EvaluationError {
    fn code(&self) -> ErrorCodes {
        match self {
            EvaluationError::Config(e) => e.code(),
            EvaluationError::Vecs(e) => e.code(),
            EvaluationError::LineFormat(e) => e.code(),
            EvaluationError::IdMapping(e) => e.code(),
            EvaluationError::Monitor(e) => e.code(),
            EvaluationError::CountMismatch { .. } => ErrorCodes::FailedPrecondition,
            EvaluationError::MappingSize { .. } => ErrorCodes::FailedPrecondition,
            EvaluationError::Engine(e) => e.code(),
        }
    }
}

fn engine_error<E: BenchError + 'static>(e: E) -> EvaluationError {
    EvaluationError::Engine(e.boxed())
}

/// Builds an index over `config.data_path` and saves it to
/// `config.index_file`. The reported time covers loading, building and saving.
#[instrument(skip(engine, config), fields(data_path = %config.data_path))]
pub fn run_build<E: RangeIndexEngine>(
    engine: &E,
    config: &BuildConfig,
) -> Result<BuildReport, EvaluationError> {
    config.validate()?;
    let params = config.build_params()?;
    let monitor = MonitorHandle::start_with(config.monitor_interval(), current_thread_count)?;

    let started = Instant::now();
    let dataset = read_vecs_with_policy::<f32>(Path::new(&config.data_path), config.open_policy())?;
    let vectors = dataset.len();
    tracing::info!(vectors, ?params, "Building index");
    let index = engine.build(dataset, &params).map_err(engine_error)?;
    engine
        .save(&index, Path::new(&config.index_file))
        .map_err(engine_error)?;
    let elapsed = started.elapsed();

    let peak_thread_count = monitor.stop();
    tracing::info!(
        elapsed_ms = elapsed.as_millis() as u64,
        peak_thread_count,
        "Index construction completed"
    );
    Ok(BuildReport {
        build_time_s: elapsed.as_secs_f64(),
        peak_thread_count,
        vectors,
        memory: MemoryFootprint::capture(),
    })
}

/// Queries, ranges and groundtruth of one workload, index aligned.
#[derive(Clone, Debug)]
pub struct Workload {
    queries: Vec<Vec<f32>>,
    ranges: Vec<(i32, i32)>,
    groundtruth: Vec<Vec<i32>>,
}

impl Workload {
    /// Fails unless there is exactly one range and one groundtruth row per
    /// query. Ranges are checked first.
    pub fn new(
        queries: Vec<Vec<f32>>,
        ranges: Vec<(i32, i32)>,
        groundtruth: Vec<Vec<i32>>,
    ) -> Result<Self, EvaluationError> {
        if ranges.len() != queries.len() {
            return Err(EvaluationError::CountMismatch {
                what: "query ranges",
                expected: queries.len(),
                found: ranges.len(),
            });
        }
        if groundtruth.len() != queries.len() {
            return Err(EvaluationError::CountMismatch {
                what: "groundtruth entries",
                expected: queries.len(),
                found: groundtruth.len(),
            });
        }
        Ok(Self {
            queries,
            ranges,
            groundtruth,
        })
    }

    pub fn load(config: &SearchConfig) -> Result<Self, EvaluationError> {
        let policy = config.open_policy();
        let queries = read_vecs_with_policy::<f32>(Path::new(&config.query_path), policy)?;
        let ranges = read_range_pairs(Path::new(&config.query_ranges_file))?;
        let groundtruth = load_groundtruth(Path::new(&config.groundtruth_file), policy)?;
        tracing::info!(
            queries = queries.len(),
            ranges = ranges.len(),
            groundtruth = groundtruth.len(),
            "Loaded workload"
        );
        Self::new(queries, ranges, groundtruth)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn load_groundtruth(path: &Path, policy: OpenPolicy) -> Result<Vec<Vec<i32>>, EvaluationError> {
    match GroundtruthFormat::from_path(path) {
        GroundtruthFormat::Ivecs => Ok(read_vecs_with_policy::<i32>(path, policy)?),
        GroundtruthFormat::Rows => Ok(read_int_rows(path)?),
    }
}

/// Outcome of the timed query loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryTally {
    pub queries_processed: usize,
    pub true_positives: usize,
    pub elapsed: Duration,
}

impl QueryTally {
    pub fn recall(&self, k: usize) -> Option<f64> {
        report::recall(self.true_positives, self.queries_processed, k)
    }

    pub fn qps(&self) -> Option<f64> {
        report::qps(self.queries_processed, self.elapsed)
    }
}

// Every groundtruth id found in the result counts, duplicates included.
// Negative ids never match.
fn count_hits(truth: &[i32], found: &HashSet<u64>) -> usize {
    truth
        .iter()
        .filter_map(|id| u64::try_from(*id).ok())
        .filter(|id| found.contains(id))
        .count()
}

/// Runs every query of `workload` in order and counts groundtruth hits. Only
/// the loop itself is timed.
pub fn evaluate<E: RangeIndexEngine>(
    engine: &E,
    index: &E::Index,
    workload: &Workload,
    mapping: Option<&IdMapping>,
    base: &SearchParams,
) -> Result<QueryTally, EvaluationError> {
    let started = Instant::now();
    let mut true_positives = 0;
    let mut queries_processed = 0;

    for (i, query) in workload.queries.iter().enumerate() {
        let (low, high) = workload.ranges[i];
        let params = SearchParams {
            low,
            high,
            ..base.clone()
        };
        let nodes = engine.range_filter(index, low, high);
        let mut results = engine
            .search_topk(index, &nodes, query, &params)
            .map_err(engine_error)?;

        let mut found = HashSet::with_capacity(results.len());
        while let Some(neighbor) = results.pop() {
            let id = u64::from(neighbor.id);
            let id = match mapping {
                Some(mapping) => mapping.translate(id)?,
                None => id,
            };
            found.insert(id);
        }

        let hits = count_hits(&workload.groundtruth[i], &found);
        tracing::debug!(query = i, low, high, nodes = nodes.len(), hits, "Query evaluated");
        true_positives += hits;
        queries_processed += 1;
    }

    Ok(QueryTally {
        queries_processed,
        true_positives,
        elapsed: started.elapsed(),
    })
}

/// Opens the index at `config.index_file` and runs the query workload against
/// it. All count checks run before the engine is touched.
#[instrument(skip(engine, config), fields(index_file = %config.index_file))]
pub fn run_search<E: RangeIndexEngine>(
    engine: &E,
    config: &SearchConfig,
) -> Result<SearchReport, EvaluationError> {
    config.validate()?;
    let base = config.search_params(0, 0)?;
    let monitor = MonitorHandle::start_with(config.monitor_interval(), current_thread_count)?;

    let workload = Workload::load(config)?;
    let mapping = if config.use_id_mapping {
        Some(IdMapping::load(&config.mapping_path())?)
    } else {
        None
    };

    let dataset = read_vecs_with_policy::<f32>(Path::new(&config.data_path), config.open_policy())?;
    let index = engine
        .open(dataset, Path::new(&config.index_file), base.edge_limit)
        .map_err(engine_error)?;
    if let Some(mapping) = &mapping {
        let cardinality = engine.cardinality(&index);
        if mapping.len() != cardinality {
            return Err(EvaluationError::MappingSize {
                mapping: mapping.len(),
                index: cardinality,
            });
        }
    }

    let tally = evaluate(engine, &index, &workload, mapping.as_ref(), &base)?;
    let peak_thread_count = monitor.stop();
    tracing::info!(
        queries = tally.queries_processed,
        true_positives = tally.true_positives,
        elapsed_ms = tally.elapsed.as_millis() as u64,
        peak_thread_count,
        "Query execution completed"
    );

    Ok(SearchReport {
        query_time_s: tally.elapsed.as_secs_f64(),
        peak_thread_count,
        queries_processed: tally.queries_processed,
        true_positives: tally.true_positives,
        k: base.k,
        qps: tally.qps(),
        recall: tally.recall(base.k),
        memory: MemoryFootprint::capture(),
    })
}
