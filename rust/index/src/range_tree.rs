//! Reference range-filtered index engine.
//!
//! A segment tree over sorted positions: every node covers a contiguous
//! position range and carries a centroid and radius over its vectors. Range
//! filtering returns the canonical cover of `[low, high]`; search visits
//! covered nodes nearest-bound first and stops once no remaining node can
//! beat the current K-th hit, so results are exact.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rangebench_error::{BenchError, ErrorCodes};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{BuildParams, RangeIndexEngine, ResultSet, SearchParams};

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Cannot build an index over an empty dataset")]
    EmptyDataset,
    #[error("Dataset of {0} vectors exceeds the 32-bit id space")]
    DatasetTooLarge(usize),
    #[error("Vector at position {position} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error("Query has dimension {found}, index has dimension {expected}")]
    QueryDimension { expected: usize, found: usize },
    #[error("Index parameter `{0}` must be a positive integer")]
    InvalidParameter(&'static str),
    #[error("Dataset has {found} vectors but the index was built over {expected}")]
    CardinalityMismatch { expected: u64, found: usize },
    #[error("Index file `{path}` has a malformed node {node}")]
    MalformedNode { path: PathBuf, node: usize },
    #[error("Unsupported index format version {0}")]
    UnsupportedFormat(u32),
    #[error("Failed to create build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Index file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Index file `{path}` is not a valid index: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

impl BenchError for IndexError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexError::EmptyDataset => ErrorCodes::FailedPrecondition,
            IndexError::DatasetTooLarge(_) => ErrorCodes::InvalidArgument,
            IndexError::DimensionMismatch { .. } => ErrorCodes::DataLoss,
            IndexError::QueryDimension { .. } => ErrorCodes::FailedPrecondition,
            IndexError::InvalidParameter(_) => ErrorCodes::InvalidArgument,
            IndexError::CardinalityMismatch { .. } => ErrorCodes::FailedPrecondition,
            IndexError::MalformedNode { .. } => ErrorCodes::DataLoss,
            IndexError::UnsupportedFormat(_) => ErrorCodes::DataLoss,
            IndexError::ThreadPool(_) => ErrorCodes::Internal,
            IndexError::Io { source, .. } => source.code(),
            IndexError::Serialization { .. } => ErrorCodes::DataLoss,
        }
    }
}

/// Handle to a node of a [`RangeTreeIndex`], returned by range filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeNodeId(pub u32);

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TreeNode {
    start: u32,
    // Exclusive.
    end: u32,
    children: Option<(u32, u32)>,
    centroid: Vec<f32>,
    radius: f32,
}

impl TreeNode {
    fn covers(&self, low: i64, high: i64) -> bool {
        low <= i64::from(self.start) && i64::from(self.end) - 1 <= high
    }

    fn overlaps(&self, low: i64, high: i64) -> bool {
        i64::from(self.start) <= high && low < i64::from(self.end)
    }

    // Squared distance from `query` to the closest point the node's ball can hold.
    fn lower_bound(&self, query: &[f32]) -> f32 {
        let slack = 1e-4 * (1.0 + self.radius);
        let gap = (l2_squared(query, &self.centroid).sqrt() - self.radius - slack).max(0.0);
        gap * gap
    }
}

#[derive(Serialize)]
struct PersistedTreeRef<'a> {
    format_version: u32,
    len: u64,
    dimension: u64,
    leaf_capacity: u64,
    ef_construction: u64,
    nodes: &'a [TreeNode],
}

#[derive(Deserialize)]
struct PersistedTree {
    format_version: u32,
    len: u64,
    dimension: u64,
    leaf_capacity: u64,
    ef_construction: u64,
    nodes: Vec<TreeNode>,
}

#[derive(Debug)]
pub struct RangeTreeIndex {
    vectors: Vec<Vec<f32>>,
    dimension: usize,
    leaf_capacity: usize,
    ef_construction: usize,
    nodes: Vec<TreeNode>,
}

impl RangeTreeIndex {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Position range `[start, end)` covered by `node`.
    pub fn node_span(&self, node: TreeNodeId) -> Option<(u32, u32)> {
        self.nodes
            .get(node.0 as usize)
            .map(|node| (node.start, node.end))
    }
}

/// Exact reference engine backed by [`RangeTreeIndex`].
#[derive(Clone, Debug, Default)]
pub struct RangeTreeEngine;

impl RangeTreeEngine {
    pub fn new() -> Self {
        Self
    }
}

fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn common_dimension(dataset: &[Vec<f32>]) -> Result<usize, IndexError> {
    let expected = match dataset.first() {
        Some(first) => first.len(),
        None => return Err(IndexError::EmptyDataset),
    };
    match dataset.iter().position(|vector| vector.len() != expected) {
        Some(position) => Err(IndexError::DimensionMismatch {
            position,
            expected,
            found: dataset[position].len(),
        }),
        None => Ok(expected),
    }
}

fn layout(nodes: &mut Vec<TreeNode>, start: u32, end: u32, leaf_capacity: u32) -> u32 {
    let id = nodes.len() as u32;
    nodes.push(TreeNode {
        start,
        end,
        children: None,
        centroid: Vec::new(),
        radius: 0.0,
    });
    if end - start > leaf_capacity {
        let mid = start + (end - start) / 2;
        let left = layout(nodes, start, mid, leaf_capacity);
        let right = layout(nodes, mid, end, leaf_capacity);
        nodes[id as usize].children = Some((left, right));
    }
    id
}

// Persisted nodes must stay inside the dataset and only point forward to
// existing children, so traversal can neither index out of bounds nor loop.
fn check_nodes(
    nodes: &[TreeNode],
    len: u32,
    dimension: usize,
    path: &Path,
) -> Result<(), IndexError> {
    let malformed = |node| IndexError::MalformedNode {
        path: path.to_path_buf(),
        node,
    };
    if nodes.is_empty() {
        return Err(malformed(0));
    }
    for (id, node) in nodes.iter().enumerate() {
        if node.start >= node.end || node.end > len || node.centroid.len() != dimension {
            return Err(malformed(id));
        }
        if let Some((left, right)) = node.children {
            let valid = |child: u32| (child as usize) > id && (child as usize) < nodes.len();
            if !valid(left) || !valid(right) {
                return Err(malformed(id));
            }
        }
    }
    Ok(())
}

fn node_bounds(vectors: &[Vec<f32>], dimension: usize) -> (Vec<f32>, f32) {
    let mut centroid = vec![0.0f32; dimension];
    for vector in vectors {
        for (c, x) in centroid.iter_mut().zip(vector) {
            *c += x;
        }
    }
    let count = vectors.len().max(1) as f32;
    centroid.iter_mut().for_each(|c| *c /= count);
    let radius = vectors
        .iter()
        .map(|vector| l2_squared(vector, &centroid).sqrt())
        .fold(0.0f32, f32::max);
    (centroid, radius)
}

impl RangeIndexEngine for RangeTreeEngine {
    type Index = RangeTreeIndex;
    type Node = TreeNodeId;
    type Error = IndexError;

    #[instrument(skip(self, dataset), fields(len = dataset.len()))]
    fn build(
        &self,
        dataset: Vec<Vec<f32>>,
        params: &BuildParams,
    ) -> Result<RangeTreeIndex, IndexError> {
        for (name, value) in [
            ("M", params.m),
            ("ef_construction", params.ef_construction),
            ("threads", params.threads),
        ] {
            if value == 0 {
                return Err(IndexError::InvalidParameter(name));
            }
        }
        let dimension = common_dimension(&dataset)?;
        let len = u32::try_from(dataset.len())
            .map_err(|_| IndexError::DatasetTooLarge(dataset.len()))?;
        let leaf_capacity = u32::try_from(params.m).unwrap_or(u32::MAX);

        let mut nodes = Vec::new();
        layout(&mut nodes, 0, len, leaf_capacity);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .thread_name(|i| format!("rangebench-build-{i}"))
            .build()?;
        pool.install(|| {
            nodes.par_iter_mut().for_each(|node| {
                let members = &dataset[node.start as usize..node.end as usize];
                let (centroid, radius) = node_bounds(members, dimension);
                node.centroid = centroid;
                node.radius = radius;
            })
        });
        tracing::info!(nodes = nodes.len(), dimension, "Range tree built");

        Ok(RangeTreeIndex {
            vectors: dataset,
            dimension,
            leaf_capacity: params.m,
            ef_construction: params.ef_construction,
            nodes,
        })
    }

    #[instrument(skip(self, index))]
    fn save(&self, index: &RangeTreeIndex, path: &Path) -> Result<(), IndexError> {
        let io_error = |source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        let persisted = PersistedTreeRef {
            format_version: FORMAT_VERSION,
            len: index.vectors.len() as u64,
            dimension: index.dimension as u64,
            leaf_capacity: index.leaf_capacity as u64,
            ef_construction: index.ef_construction as u64,
            nodes: &index.nodes,
        };
        bincode::serialize_into(&mut writer, &persisted).map_err(|source| {
            IndexError::Serialization {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(io_error)
    }

    #[instrument(skip(self, dataset), fields(len = dataset.len()))]
    fn open(
        &self,
        dataset: Vec<Vec<f32>>,
        index_path: &Path,
        m: usize,
    ) -> Result<RangeTreeIndex, IndexError> {
        let file = File::open(index_path).map_err(|source| IndexError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;
        let persisted: PersistedTree = bincode::deserialize_from(BufReader::new(file))
            .map_err(|source| IndexError::Serialization {
                path: index_path.to_path_buf(),
                source,
            })?;
        if persisted.format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedFormat(persisted.format_version));
        }
        if persisted.len != dataset.len() as u64 {
            return Err(IndexError::CardinalityMismatch {
                expected: persisted.len,
                found: dataset.len(),
            });
        }
        let dimension = common_dimension(&dataset)?;
        if dimension as u64 != persisted.dimension {
            return Err(IndexError::DimensionMismatch {
                position: 0,
                expected: persisted.dimension as usize,
                found: dimension,
            });
        }
        let len = u32::try_from(dataset.len())
            .map_err(|_| IndexError::DatasetTooLarge(dataset.len()))?;
        check_nodes(&persisted.nodes, len, dimension, index_path)?;
        if persisted.leaf_capacity != m as u64 {
            tracing::warn!(
                built_with = persisted.leaf_capacity,
                requested = m,
                "Index was built with a different M"
            );
        }
        Ok(RangeTreeIndex {
            vectors: dataset,
            dimension,
            leaf_capacity: persisted.leaf_capacity as usize,
            ef_construction: persisted.ef_construction as usize,
            nodes: persisted.nodes,
        })
    }

    fn cardinality(&self, index: &RangeTreeIndex) -> usize {
        index.vectors.len()
    }

    fn range_filter(&self, index: &RangeTreeIndex, low: i32, high: i32) -> Vec<TreeNodeId> {
        let mut covering = Vec::new();
        let low = i64::from(low).max(0);
        let high = i64::from(high).min(index.vectors.len() as i64 - 1);
        if index.nodes.is_empty() || low > high {
            return covering;
        }
        let mut stack = vec![0u32];
        while let Some(id) = stack.pop() {
            let node = &index.nodes[id as usize];
            if !node.overlaps(low, high) {
                continue;
            }
            match node.children {
                Some((left, right)) if !node.covers(low, high) => {
                    stack.push(right);
                    stack.push(left);
                }
                _ => covering.push(TreeNodeId(id)),
            }
        }
        covering
    }

    #[instrument(
        level = "trace",
        skip_all,
        fields(k = params.k, ef_search = params.ef_search, edge_limit = params.edge_limit)
    )]
    fn search_topk(
        &self,
        index: &RangeTreeIndex,
        nodes: &[TreeNodeId],
        query: &[f32],
        params: &SearchParams,
    ) -> Result<ResultSet, IndexError> {
        if query.len() != index.dimension {
            return Err(IndexError::QueryDimension {
                expected: index.dimension,
                found: query.len(),
            });
        }
        let mut results = ResultSet::new(params.k);
        if params.k == 0 {
            return Ok(results);
        }

        let mut ordered: Vec<(f32, &TreeNode)> = nodes
            .iter()
            .filter_map(|id| index.nodes.get(id.0 as usize))
            .map(|node| (node.lower_bound(query), node))
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (low, high) = (i64::from(params.low), i64::from(params.high));
        for (bound, node) in ordered {
            if results.is_full() && results.worst().is_some_and(|worst| bound > worst.distance) {
                break;
            }
            for position in node.start..node.end {
                let key = i64::from(position);
                if key < low || key > high {
                    continue;
                }
                let distance = l2_squared(query, &index.vectors[position as usize]);
                results.push(distance, position);
            }
        }
        Ok(results)
    }
}
