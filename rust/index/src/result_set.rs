use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A single search hit. Ordered by distance, ties broken by id, so a
/// `BinaryHeap<Neighbor>` keeps the worst hit on top.
#[derive(Clone, Copy, Debug)]
pub struct Neighbor {
    pub distance: f32,
    pub id: u32,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Bounded top-K collection of search hits.
///
/// Backed by a max-heap so the current worst hit is at the top: once the set
/// holds `capacity` hits, an insertion either displaces the top in O(log K)
/// or is rejected in O(1).
#[derive(Clone, Debug)]
pub struct ResultSet {
    capacity: usize,
    heap: BinaryHeap<Neighbor>,
}

// Upper bound on up-front heap allocation. Larger sets grow on demand.
const PREALLOCATED_HITS: usize = 1024;

impl ResultSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(PREALLOCATED_HITS)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// The hit that would be evicted next.
    pub fn worst(&self) -> Option<&Neighbor> {
        self.heap.peek()
    }

    /// Offers a hit. Returns true if it was kept.
    pub fn push(&mut self, distance: f32, id: u32) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let candidate = Neighbor { distance, id };
        if self.heap.len() < self.capacity {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if candidate < *worst => {
                self.heap.pop();
                self.heap.push(candidate);
                true
            }
            _ => false,
        }
    }

    /// Removes and returns the current worst hit.
    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop()
    }

    /// Hits ordered from nearest to farthest.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }

    pub fn into_ids(self) -> Vec<u32> {
        self.into_sorted_vec().into_iter().map(|n| n.id).collect()
    }
}
