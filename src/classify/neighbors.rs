use std::cmp::Ordering;

use ndarray::prelude::*;

use crate::classify::linalg::euclidean_distances;

/// Rows whose distances are held in memory at once.
const BLOCK_ROWS: usize = 256;

/// Exact k-nearest-neighbour graph, excluding each point itself.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    /// `(n, k)` neighbour indices, nearest first.
    pub indices: Array2<usize>,
    /// `(n, k)` distances matching `indices`.
    pub distances: Array2<f64>,
}

impl NeighborGraph {
    pub fn k(&self) -> usize {
        self.indices.ncols()
    }
}

/// Brute-force neighbour search. Ties are broken by index so the graph is reproducible.
/// `k` is capped at `n - 1`.
#[tracing::instrument(name = "Computing nearest neighbours", level = "debug", skip(data))]
pub fn k_nearest(data: ArrayView2<f64>, k: usize) -> NeighborGraph {
    k_nearest_blocked(data, k, BLOCK_ROWS)
}

/// Distances are computed `block_rows` query rows at a time, so memory stays at
/// `block_rows * n` instead of `n * n`.
fn k_nearest_blocked(data: ArrayView2<f64>, k: usize, block_rows: usize) -> NeighborGraph {
    let n = data.nrows();
    let k = k.min(n.saturating_sub(1));
    let block_rows = block_rows.max(1);

    let mut indices = Array2::<usize>::zeros((n, k));
    let mut distances = Array2::<f64>::zeros((n, k));
    let mut order: Vec<usize> = Vec::with_capacity(n);
    for (block, queries) in data.axis_chunks_iter(Axis(0), block_rows).enumerate() {
        let offset = block * block_rows;
        let block_distances = euclidean_distances(queries, data);
        for (local, row) in block_distances.axis_iter(Axis(0)).enumerate() {
            let i = offset + local;
            order.clear();
            order.extend((0..n).filter(|&j| j != i));
            order.sort_by(|&a, &b| {
                row[a]
                    .partial_cmp(&row[b])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });
            for (slot, &j) in order.iter().take(k).enumerate() {
                indices[[i, slot]] = j;
                distances[[i, slot]] = row[j];
            }
        }
    }

    NeighborGraph { indices, distances }
}
