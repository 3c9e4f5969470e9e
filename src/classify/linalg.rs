use hdbscan::{DistanceMetric, Hdbscan, HdbscanHyperParams, NnAlgorithm};
use ndarray::prelude::*;
use ndarray::{Data, RemoveAxis};
use ndarray_linalg::norm::{NormalizeAxis, normalize};
use tracing::debug;

use crate::AppResult;

pub fn row_norms<S, D>(x: &ArrayBase<S, D>, squared: bool) -> Array<f64, D::Smaller>
where
    S: Data<Elem = f64>,
    D: Dimension + RemoveAxis,
{
    let sum = x.mapv(|v| v * v).sum_axis(Axis(1));
    if squared { sum } else { sum.sqrt() }
}

/// Scale every row to unit L2 norm. All-zero rows are left as zeros.
#[tracing::instrument(name = "Normalizing embeddings", level = "debug", skip(data))]
pub fn normalize_embedding(data: Array2<f64>) -> Array2<f64> {
    let (mut normed, norms) = normalize(data, NormalizeAxis::Row);
    for (mut row, norm) in normed.axis_iter_mut(Axis(0)).zip(norms) {
        if norm <= f64::EPSILON {
            row.fill(0.0);
        }
    }
    normed
}

/// Run HDBSCAN over the rows of `data`; `-1` marks noise.
#[tracing::instrument(name = "Running HDBSCAN", level = "info", skip(data))]
pub fn cluster_embeddings(
    data: &Array2<f64>,
    min_cluster_size: usize,
    min_samples: usize,
) -> AppResult<Vec<i32>> {
    let params = HdbscanHyperParams::builder()
        .min_cluster_size(min_cluster_size)
        .min_samples(min_samples)
        .dist_metric(DistanceMetric::Euclidean)
        .nn_algorithm(NnAlgorithm::Auto)
        .build();
    let rows = data
        .axis_iter(Axis(0))
        .map(|row| row.to_vec())
        .collect::<Vec<Vec<f64>>>();
    debug!("Clustering {} rows", rows.len());
    let hdbscan = Hdbscan::new(&rows, params);
    Ok(hdbscan.cluster()?)
}

/// Pairwise Euclidean distances between the rows of `a` and the rows of `b`,
/// via `|a|^2 + |b|^2 - 2ab`, clamped at zero.
pub fn euclidean_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let aa = row_norms(&a, true).insert_axis(Axis(1));
    let bb = row_norms(&b, true).insert_axis(Axis(0));
    let mut distances: Array2<f64> = -2.0 * a.dot(&b.t());
    distances += &aa;
    distances += &bb;
    distances.mapv_inplace(|d| d.max(0.0).sqrt());
    distances
}
