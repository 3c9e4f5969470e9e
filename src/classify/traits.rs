use futures::future::BoxFuture;
use ndarray::Array2;

use crate::AppResult;
use crate::classify::cluster::ClusterAssignment;

/// Trait for converting text into vector embeddings.
pub trait Embedder: Send + Sync {
    /// Embed a single text. Errors are treated as a failed attempt by the caller.
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<Vec<f32>>>;
}

/// Trait for clustering vector embeddings.
pub trait Clusterer: Send + Sync {
    /// Cluster the given embeddings.
    /// Returns one label per input row; noise rows carry [`crate::classify::cluster::NOISE`].
    fn cluster(&self, embeddings: &Array2<f64>) -> AppResult<ClusterAssignment>;
}
