use ndarray::prelude::*;
use ndarray_linalg::SVD;

use crate::AppResult;
use crate::error::AppError;

/// Project rows onto their first `n_components` principal axes.
///
/// Each axis is flipped so that its largest-magnitude entry is positive, which pins down the sign
/// SVD leaves free and keeps seeded layouts reproducible.
#[tracing::instrument(name = "Performing PCA", level = "debug", skip(data))]
pub fn pca_reduce(data: &Array2<f64>, n_components: usize) -> AppResult<Array2<f64>> {
    let (n, d) = data.dim();
    if n == 0 || d == 0 {
        return Err(AppError::Projection("PCA needs a non-empty matrix".to_string()));
    }
    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| AppError::Projection("PCA needs at least one row".to_string()))?;
    let centered = data - &mean.insert_axis(Axis(0));

    let (_, _, vt) = centered.svd(false, true)?;
    let vt = vt.ok_or_else(|| AppError::Projection("SVD returned no right vectors".to_string()))?;

    // Axes past the rank of the data stay zero.
    let mut components = Array2::<f64>::zeros((d, n_components));
    let rank = n.min(d).min(n_components);
    for (c, axis) in vt.axis_iter(Axis(0)).take(rank).enumerate() {
        let pivot = axis
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        components.column_mut(c).assign(&axis.mapv(|v| v * sign));
    }

    Ok(centered.dot(&components))
}
