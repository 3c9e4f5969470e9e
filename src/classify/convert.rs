use ndarray::prelude::*;
use tracing::trace;

/// Stack equally sized `f32` vectors into an `f64` matrix, one row per vector.
/// An empty slice gives a `0 x 0` matrix. Callers check that lengths agree.
#[tracing::instrument(name = "Stacking embeddings", level = "debug", skip(embs))]
pub fn embeddings_to_ndarray(embs: &[&[f32]]) -> Array2<f64> {
    let rows = embs.len();
    let cols = embs.first().map_or(0, |e| e.len());
    let mut arr: Array2<f64> = Array2::<f64>::zeros((rows, cols));
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (mut row, emb) in arr.axis_iter_mut(Axis(0)).zip(embs) {
        debug_assert_eq!(emb.len(), cols);
        for (val, &x) in row.iter_mut().zip(emb.iter()) {
            *val = x as f64;
        }
    }
    arr
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn converts_embeddings_to_f64_ndarray() {
        let a = [1.0_f32, 2.5_f32];
        let b = [3.75_f32, -4.0_f32];
        let arr = embeddings_to_ndarray(&[&a, &b]);

        assert_eq!(arr.dim(), (2, 2));
        let expected = array![[1.0_f64, 2.5_f64], [3.75_f64, -4.0_f64]];
        assert_eq!(arr, expected);
    }

    #[test]
    fn empty_input_gives_empty_matrix() {
        let arr = embeddings_to_ndarray(&[]);
        assert_eq!(arr.dim(), (0, 0));
    }
}
