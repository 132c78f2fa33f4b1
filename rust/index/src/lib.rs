pub mod engine;
pub mod range_tree;
pub mod result_set;

// Re-export types

pub use engine::*;
pub use range_tree::{RangeTreeEngine, RangeTreeIndex, TreeNodeId};
pub use result_set::{Neighbor, ResultSet};
