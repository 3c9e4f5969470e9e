use std::collections::BTreeMap;

use ndarray::prelude::*;
use ndarray_rand::{
    RandomExt,
    rand::{Rng, SeedableRng, rngs::StdRng},
    rand_distr::Uniform,
};
use tracing::{debug, info};

use crate::AppResult;
use crate::classify::neighbors::{NeighborGraph, k_nearest};
use crate::classify::pca::pca_reduce;
use crate::config::ProjectionArgs;
use crate::error::AppError;

const SPREAD: f64 = 1.0;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const GRADIENT_CLIP: f64 = 4.0;
const BANDWIDTH_ITERATIONS: usize = 64;
const BANDWIDTH_TOLERANCE: f64 = 1e-5;
const MIN_BANDWIDTH_SCALE: f64 = 1e-3;
const INIT_JITTER: f64 = 1e-4;

/// UMAP-style 2-D layout used for plotting only.
#[derive(Debug, Clone)]
pub struct Projector {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub seed: u64,
}

impl Projector {
    pub fn new(args: &ProjectionArgs) -> Self {
        Self {
            n_neighbors: args.n_neighbors,
            min_dist: args.min_dist,
            n_epochs: args.n_epochs,
            seed: args.seed,
        }
    }

    /// Lay out the rows of `data` in two dimensions. Same input and seed give the same output.
    #[tracing::instrument(name = "Projecting embeddings", level = "info", skip_all)]
    pub fn project(&self, data: &Array2<f64>) -> AppResult<Array2<f64>> {
        let n = data.nrows();
        if n < 3 {
            return Err(AppError::Projection(format!(
                "need at least 3 rows to project, got {n}"
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Projection(
                "input contains non-finite values".to_string(),
            ));
        }

        let k = self.n_neighbors.clamp(1, n - 1);
        let graph = k_nearest(data.view(), k);
        let edges = fuzzy_union(&graph);
        debug!("Fuzzy graph has {} edges", edges.len());

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut layout = initial_layout(data, &mut rng)?;
        let (a, b) = fit_curve(SPREAD, self.min_dist);
        debug!("Curve parameters a={:.4} b={:.4}", a, b);

        optimize_layout(&mut layout, &edges, a, b, self.n_epochs.max(1), &mut rng);
        info!("Projected {} rows to 2-D", n);
        Ok(layout)
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self::new(&ProjectionArgs::default())
    }
}

/// Directed membership strengths `w(i -> j)` for each point's neighbours.
///
/// `rho` is the distance to the nearest non-identical neighbour and `sigma` is found by bisection
/// so that the memberships of a point sum to `log2(k)`.
fn membership_strengths(graph: &NeighborGraph) -> Array2<f64> {
    let (n, k) = graph.distances.dim();
    let target = (k as f64).log2();
    let mean_distance = graph.distances.mean().unwrap_or(0.0);
    let mut weights = Array2::<f64>::zeros((n, k));

    for i in 0..n {
        let row = graph.distances.row(i);
        let rho = row.iter().copied().find(|d| *d > 0.0).unwrap_or(0.0);

        let total = |sigma: f64| -> f64 {
            row.iter()
                .map(|&d| membership((d - rho).max(0.0), sigma))
                .sum::<f64>()
        };

        let (mut lo, mut hi, mut sigma) = (0.0_f64, f64::INFINITY, 1.0_f64);
        for _ in 0..BANDWIDTH_ITERATIONS {
            let psum = total(sigma);
            if (psum - target).abs() < BANDWIDTH_TOLERANCE {
                break;
            }
            if psum > target {
                hi = sigma;
                sigma = (lo + hi) / 2.0;
            } else {
                lo = sigma;
                sigma = if hi.is_infinite() {
                    sigma * 2.0
                } else {
                    (lo + hi) / 2.0
                };
            }
        }

        let row_mean = row.mean().unwrap_or(0.0);
        let scale = if rho > 0.0 { row_mean } else { mean_distance };
        let floor = scale * MIN_BANDWIDTH_SCALE;
        let sigma = sigma.max(floor);

        for (slot, &d) in row.iter().enumerate() {
            weights[[i, slot]] = membership((d - rho).max(0.0), sigma);
        }
    }
    weights
}

fn membership(gap: f64, sigma: f64) -> f64 {
    if gap <= 0.0 {
        1.0
    } else if sigma <= 0.0 {
        0.0
    } else {
        (-gap / sigma).exp()
    }
}

/// Symmetrise with the fuzzy union `p + q - p*q`. Edges are keyed `(low, high)` and returned in
/// key order.
fn fuzzy_union(graph: &NeighborGraph) -> Vec<(usize, usize, f64)> {
    let weights = membership_strengths(graph);
    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for ((i, slot), &w) in weights.indexed_iter() {
        let j = graph.indices[[i, slot]];
        if w > 0.0 {
            directed.insert((i, j), w);
        }
    }

    let mut undirected: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &p) in &directed {
        let key = (i.min(j), i.max(j));
        if undirected.contains_key(&key) {
            continue;
        }
        let q = directed.get(&(j, i)).copied().unwrap_or(0.0);
        undirected.insert(key, p + q - p * q);
    }

    undirected
        .into_iter()
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// PCA onto two axes, rescaled into `[0, 10]`, plus a little seeded noise to split duplicates.
fn initial_layout(data: &Array2<f64>, rng: &mut StdRng) -> AppResult<Array2<f64>> {
    let mut layout = pca_reduce(data, 2)?;
    let min = layout.iter().copied().fold(f64::INFINITY, f64::min);
    let max = layout.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range > f64::EPSILON {
        layout.mapv_inplace(|v| 10.0 * (v - min) / range);
    } else {
        layout.fill(0.0);
    }

    let jitter = Uniform::new(-INIT_JITTER, INIT_JITTER)
        .map_err(|e| AppError::Projection(e.to_string()))?;
    layout += &Array2::<f64>::random_using(layout.dim(), jitter, rng);
    Ok(layout)
}

/// Fit `1 / (1 + a * x^(2b))` to the target curve that is flat up to `min_dist` and then decays
/// exponentially with `spread`. Least squares over a grid, refined three times.
pub(crate) fn fit_curve(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300)
        .map(|i| 3.0 * spread * i as f64 / 299.0)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let error = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let fit = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (fit - y).powi(2)
            })
            .sum()
    };

    let (mut best_a, mut best_b, mut best_err) = (1.0_f64, 1.0_f64, f64::INFINITY);
    let (mut step_a, mut step_b) = (0.05_f64, 0.01_f64);
    let (mut a_range, mut b_range): ((f64, f64), (f64, f64)) = ((0.05, 5.0), (0.1, 2.0));
    for _ in 0..4 {
        let a_steps = ((a_range.1 - a_range.0) / step_a).round() as usize;
        let b_steps = ((b_range.1 - b_range.0) / step_b).round() as usize;
        for ia in 0..=a_steps {
            let a = a_range.0 + ia as f64 * step_a;
            if a <= 0.0 {
                continue;
            }
            for ib in 0..=b_steps {
                let b = b_range.0 + ib as f64 * step_b;
                if b <= 0.0 {
                    continue;
                }
                let err = error(a, b);
                if err < best_err {
                    (best_a, best_b, best_err) = (a, b, err);
                }
            }
        }
        a_range = (best_a - step_a, best_a + step_a);
        b_range = (best_b - step_b, best_b + step_b);
        step_a /= 10.0;
        step_b /= 10.0;
    }
    (best_a, best_b)
}

/// Stochastic gradient descent on the layout: attraction along graph edges, repulsion from
/// randomly drawn points.
fn optimize_layout(
    layout: &mut Array2<f64>,
    edges: &[(usize, usize, f64)],
    a: f64,
    b: f64,
    n_epochs: usize,
    rng: &mut StdRng,
) {
    let max_weight = edges.iter().map(|e| e.2).fold(0.0, f64::max);
    if max_weight <= 0.0 {
        return;
    }
    let floor = max_weight / n_epochs as f64;

    // Both directions of every kept edge, so each endpoint gets to be the head.
    let mut heads = Vec::new();
    let mut tails = Vec::new();
    let mut epochs_per_sample = Vec::new();
    for &(i, j, w) in edges.iter().filter(|e| e.2 >= floor) {
        for (h, t) in [(i, j), (j, i)] {
            heads.push(h);
            tails.push(t);
            epochs_per_sample.push(max_weight / w);
        }
    }
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|e| e / NEGATIVE_SAMPLE_RATE as f64)
        .collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let n = layout.nrows();
    for epoch in 0..n_epochs {
        let alpha = 1.0 - epoch as f64 / n_epochs as f64;
        let now = epoch as f64;
        for e in 0..heads.len() {
            if next_sample[e] > now {
                continue;
            }
            let (j, k) = (heads[e], tails[e]);

            let dist_sq = squared_distance(layout, j, k);
            let coeff = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..2 {
                let grad = clip(coeff * (layout[[j, d]] - layout[[k, d]]));
                layout[[j, d]] += grad * alpha;
                layout[[k, d]] -= grad * alpha;
            }
            next_sample[e] += epochs_per_sample[e];

            let n_negative = ((now - next_negative[e]) / epochs_per_negative[e]).floor();
            let n_negative = if n_negative > 0.0 { n_negative as usize } else { 0 };
            for _ in 0..n_negative {
                let k = rng.random_range(0..n);
                if k == j {
                    continue;
                }
                let dist_sq = squared_distance(layout, j, k);
                let coeff = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..2 {
                    let grad = if coeff > 0.0 {
                        clip(coeff * (layout[[j, d]] - layout[[k, d]]))
                    } else {
                        GRADIENT_CLIP
                    };
                    layout[[j, d]] += grad * alpha;
                }
            }
            next_negative[e] += n_negative as f64 * epochs_per_negative[e];
        }
    }
}

fn squared_distance(layout: &Array2<f64>, i: usize, j: usize) -> f64 {
    (0..layout.ncols())
        .map(|d| (layout[[i, d]] - layout[[j, d]]).powi(2))
        .sum()
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> Projector {
        Projector {
            n_neighbors: 5,
            min_dist: 0.1,
            n_epochs: 100,
            seed: 42,
        }
    }

    /// Two groups of ten points, far apart in 6-D.
    fn blobs() -> Array2<f64> {
        Array2::from_shape_fn((20, 6), |(i, d)| {
            let base = if i < 10 { 0.0 } else { 10.0 };
            let jitter = 0.1 * ((i * 7 + d * 3) as f64).sin();
            if d < 3 { base + jitter } else { jitter }
        })
    }

    fn centroid(layout: &Array2<f64>, rows: std::ops::Range<usize>) -> [f64; 2] {
        let count = rows.len() as f64;
        let mut c = [0.0; 2];
        for i in rows {
            c[0] += layout[[i, 0]] / count;
            c[1] += layout[[i, 1]] / count;
        }
        c
    }

    #[test]
    fn output_has_one_point_per_row() {
        let layout = projector().project(&blobs()).unwrap();
        assert_eq!(layout.dim(), (20, 2));
        assert!(layout.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn same_seed_gives_same_layout() {
        let data = blobs();
        let first = projector().project(&data).unwrap();
        let second = projector().project(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fewer_than_three_rows_is_an_error() {
        let data = array![[0.0, 1.0], [1.0, 0.0]];
        let err = projector().project(&data).unwrap_err();
        assert!(matches!(err, AppError::Projection(_)));
    }

    #[test]
    fn input_is_left_untouched() {
        let data = blobs();
        let copy = data.clone();
        let _ = projector().project(&data).unwrap();
        assert_eq!(data, copy);
    }

    #[test]
    fn separated_groups_stay_separated() {
        let layout = projector().project(&blobs()).unwrap();
        let ca = centroid(&layout, 0..10);
        let cb = centroid(&layout, 10..20);
        let between = ((ca[0] - cb[0]).powi(2) + (ca[1] - cb[1]).powi(2)).sqrt();
        let spread = |c: [f64; 2], rows: std::ops::Range<usize>| {
            rows.map(|i| ((layout[[i, 0]] - c[0]).powi(2) + (layout[[i, 1]] - c[1]).powi(2)).sqrt())
                .fold(0.0, f64::max)
        };
        assert!(between > spread(ca, 0..10));
        assert!(between > spread(cb, 10..20));
    }

    #[test]
    fn curve_fit_matches_known_parameters() {
        let (a, b) = fit_curve(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.05, "a = {a}");
        assert!((b - 0.895).abs() < 0.02, "b = {b}");
    }
}
