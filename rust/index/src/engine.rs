//! The seam between the benchmark harness and the index engine it measures.
//!
//! The harness owns none of the indexing algorithms. It loads inputs, hands
//! vectors to an engine, and asks for range-filtered top-K results; anything
//! implementing [`RangeIndexEngine`] can be benchmarked.

use std::fmt::Debug;
use std::path::Path;

use rangebench_error::BenchError;

/// Parameters for index construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildParams {
    /// Fan-out: maximum edge degree per node.
    pub m: usize,
    /// Candidate queue size used while building.
    pub ef_construction: usize,
    /// Upper bound on worker threads the engine may use.
    pub threads: usize,
}

/// Parameters for one range-filtered top-K query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchParams {
    /// Candidate queue size used while searching.
    pub ef_search: usize,
    /// Number of neighbors to return.
    pub k: usize,
    /// Inclusive lower bound of the key range.
    pub low: i32,
    /// Inclusive upper bound of the key range.
    pub high: i32,
    /// Maximum number of edges followed per visited node.
    pub edge_limit: usize,
}

pub trait RangeIndexEngine {
    /// A built or opened index.
    type Index;
    /// An entry node of the range-filter structure.
    type Node: Clone + Debug;
    type Error: BenchError + 'static;

    /// Builds an index over `dataset`, whose positions are the sorted ID space.
    fn build(&self, dataset: Vec<Vec<f32>>, params: &BuildParams)
        -> Result<Self::Index, Self::Error>;

    /// Persists a built index to `path`.
    fn save(&self, index: &Self::Index, path: &Path) -> Result<(), Self::Error>;

    /// Opens a persisted index. The vectors are supplied by the caller because
    /// the index file does not carry them.
    fn open(
        &self,
        dataset: Vec<Vec<f32>>,
        index_path: &Path,
        m: usize,
    ) -> Result<Self::Index, Self::Error>;

    /// Number of indexed vectors.
    fn cardinality(&self, index: &Self::Index) -> usize;

    /// Entry nodes overlapping the inclusive key range `[low, high]`.
    fn range_filter(&self, index: &Self::Index, low: i32, high: i32) -> Vec<Self::Node>;

    /// Up to `params.k` nearest neighbors of `query` among `nodes`, restricted
    /// to keys in `[params.low, params.high]`. Returned ids are in sorted ID
    /// space.
    fn search_topk(
        &self,
        index: &Self::Index,
        nodes: &[Self::Node],
        query: &[f32],
        params: &SearchParams,
    ) -> Result<crate::ResultSet, Self::Error>;
}
