use std::collections::BTreeMap;

use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::AppResult;
use crate::classify::linalg;
use crate::classify::traits::Clusterer;
use crate::config::ClusterArgs;

/// Label assigned to rows that belong to no cluster.
pub const NOISE: i32 = -1;

/// One cluster label per row of the aligned matrix, in row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterAssignment {
    labels: Vec<i32>,
}

impl ClusterAssignment {
    pub fn new(labels: Vec<i32>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Distinct non-noise ids, ascending.
    pub fn cluster_ids(&self) -> Vec<i32> {
        self.sizes().into_keys().collect()
    }

    /// Row indices carrying `id`, ascending.
    pub fn members(&self, id: i32) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == id)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == NOISE).count()
    }

    /// Member count per non-noise cluster.
    pub fn sizes(&self) -> BTreeMap<i32, usize> {
        let mut sizes = BTreeMap::new();
        for &label in self.labels.iter().filter(|l| **l != NOISE) {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }

    /// Row indices grouped per non-noise cluster.
    pub fn grouped(&self) -> BTreeMap<i32, Vec<usize>> {
        let mut grouped: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, &label) in self.labels.iter().enumerate() {
            if label != NOISE {
                grouped.entry(label).or_default().push(i);
            }
        }
        grouped
    }
}

/// Density clustering over L2-normalized embeddings.
#[derive(Debug, Clone, Copy)]
pub struct HdbscanClusterer {
    pub min_cluster_size: usize,
    pub min_samples: usize,
}

impl HdbscanClusterer {
    pub fn new(args: &ClusterArgs) -> Self {
        Self {
            min_cluster_size: args.min_cluster_size as usize,
            min_samples: args.min_samples as usize,
        }
    }
}

impl Default for HdbscanClusterer {
    fn default() -> Self {
        Self::new(&ClusterArgs::default())
    }
}

impl Clusterer for HdbscanClusterer {
    fn cluster(&self, embeddings: &Array2<f64>) -> AppResult<ClusterAssignment> {
        let n = embeddings.nrows();
        if n < 2 || n < self.min_cluster_size || n <= self.min_samples {
            warn!(
                "Only {} rows for min_cluster_size={} min_samples={}; every row is noise",
                n, self.min_cluster_size, self.min_samples
            );
            return Ok(ClusterAssignment::new(vec![NOISE; n]));
        }

        let normalized = linalg::normalize_embedding(embeddings.clone());
        let labels =
            linalg::cluster_embeddings(&normalized, self.min_cluster_size, self.min_samples)?;
        debug_assert_eq!(labels.len(), n);

        // Anything below -1 is treated as noise too.
        let labels = labels
            .into_iter()
            .map(|l| if l < 0 { NOISE } else { l })
            .collect();
        let assignment = ClusterAssignment::new(labels);
        info!(
            "Found {} clusters, {} noise rows",
            assignment.cluster_ids().len(),
            assignment.noise_count()
        );
        debug!("Cluster sizes: {:?}", assignment.sizes());
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    /// Two tight groups on different axes plus a few scattered points.
    fn two_groups() -> Array2<f64> {
        let dim = 8;
        let mut rows = Vec::new();
        for i in 0..20 {
            let mut v = vec![0.0; dim];
            v[0] = 1.0;
            v[6] = 0.01 * (i as f64).sin();
            v[7] = 0.01 * (i as f64).cos();
            rows.push(v);
        }
        for i in 0..20 {
            let mut v = vec![0.0; dim];
            v[1] = 1.0;
            v[6] = 0.01 * (i as f64).cos();
            v[7] = 0.01 * (i as f64).sin();
            rows.push(v);
        }
        for axis in 2..5 {
            let mut v = vec![0.0; dim];
            v[axis] = 1.0;
            rows.push(v);
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((43, dim), flat).unwrap()
    }

    #[test]
    fn assignment_helpers() {
        let a = ClusterAssignment::new(vec![1, NOISE, 0, 1, NOISE, 0, 0]);
        assert_eq!(a.cluster_ids(), vec![0, 1]);
        assert_eq!(a.members(0), vec![2, 5, 6]);
        assert_eq!(a.noise_count(), 2);
        let total: usize = a.sizes().values().sum::<usize>() + a.noise_count();
        assert_eq!(total, a.len());
        assert_eq!(a.grouped()[&1], vec![0, 3]);
    }

    #[test]
    fn too_few_rows_are_all_noise() {
        let clusterer = HdbscanClusterer {
            min_cluster_size: 15,
            min_samples: 5,
        };
        let data = Array2::<f64>::ones((4, 3));
        let assignment = clusterer.cluster(&data).unwrap();
        assert_eq!(assignment.labels(), &[NOISE; 4]);
    }

    #[test]
    fn separated_groups_form_two_clusters() {
        let clusterer = HdbscanClusterer {
            min_cluster_size: 5,
            min_samples: 3,
        };
        let assignment = clusterer.cluster(&two_groups()).unwrap();
        assert_eq!(assignment.len(), 43);
        assert_eq!(assignment.cluster_ids().len(), 2);

        let first = assignment.labels()[0];
        let second = assignment.labels()[20];
        assert_ne!(first, NOISE);
        assert_ne!(second, NOISE);
        assert_ne!(first, second);
        assert!(assignment.labels()[..20].iter().all(|l| *l == first));
        assert!(assignment.labels()[20..40].iter().all(|l| *l == second));
    }

    #[test]
    fn clustering_is_deterministic() {
        let clusterer = HdbscanClusterer {
            min_cluster_size: 5,
            min_samples: 3,
        };
        let data = two_groups();
        assert_eq!(
            clusterer.cluster(&data).unwrap(),
            clusterer.cluster(&data).unwrap()
        );
    }
}
