pub mod align;
pub mod cluster;
pub(super) mod convert;
pub mod embed;
pub(super) mod linalg;
pub(super) mod neighbors;
pub mod openai;
pub(super) mod pca;
pub mod project;
pub mod traits;

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use crate::AppResult;
use crate::ai::generate::Generator;
use crate::ai::label_clusters::{ClusterLabelRecord, ClusterLabeler};
use crate::classify::align::AlignedDataset;
use crate::classify::cluster::ClusterAssignment;
use crate::classify::embed::EmbeddingClient;
use crate::classify::project::Projector;
use crate::classify::traits::{Clusterer, Embedder};
use crate::document::Document;
use crate::error::AppError;

/// Counts describing one run, written next to the artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub documents_total: usize,
    pub documents_embedded: usize,
    pub documents_dropped: usize,
    pub dimension: Option<usize>,
    pub clusters_found: usize,
    pub cluster_sizes: BTreeMap<i32, usize>,
    pub noise_count: usize,
    pub labels_parsed: usize,
    pub labels_raw_fallback: usize,
    pub label_calls_failed: usize,
    pub projection_ok: bool,
}

/// Everything a run produces. `assignment`, `projection` rows and `dataset` rows line up.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub dataset: AlignedDataset,
    pub assignment: ClusterAssignment,
    pub projection: Option<Array2<f64>>,
    pub labels: BTreeMap<i32, ClusterLabelRecord>,
    pub report: RunReport,
}

/// Embed, align, cluster, project and label a batch of posts.
pub struct Classifier<E, C, G> {
    embedding: EmbeddingClient<E>,
    clusterer: C,
    projector: Option<Projector>,
    labeler: ClusterLabeler<G>,
}

impl<E: Embedder, C: Clusterer, G: Generator> Classifier<E, C, G> {
    /// `projector` is `None` when no plot is wanted.
    pub fn new(
        embedding: EmbeddingClient<E>,
        clusterer: C,
        projector: Option<Projector>,
        labeler: ClusterLabeler<G>,
    ) -> Self {
        Self {
            embedding,
            clusterer,
            projector,
            labeler,
        }
    }

    #[tracing::instrument(name = "Classifying posts", level = "info", skip_all)]
    pub async fn run(&self, documents: Vec<Document>) -> AppResult<RunOutput> {
        let documents_total = documents.len();
        info!("Embedding {} posts", documents_total);

        let texts: Vec<&str> = documents.iter().map(|d| d.text.as_str()).collect();
        let results = self.embedding.embed_all(&texts).await;
        drop(texts);

        let dataset = AlignedDataset::align(documents, results)?;
        if dataset.is_empty() {
            return Err(AppError::InsufficientData(format!(
                "none of the {documents_total} posts could be embedded"
            )));
        }
        info!(
            "{} posts embedded ({} dropped), dimension {:?}",
            dataset.len(),
            dataset.dropped(),
            dataset.dimension()
        );

        let assignment = self.clusterer.cluster(dataset.matrix())?;
        assert_eq!(
            assignment.len(),
            dataset.len(),
            "clusterer must label every row"
        );

        let projection = match &self.projector {
            Some(projector) => {
                let projector = projector.clone();
                let matrix = linalg::normalize_embedding(dataset.matrix().clone());
                match tokio::task::spawn_blocking(move || projector.project(&matrix)).await? {
                    Ok(layout) => Some(layout),
                    Err(e) => {
                        warn!("Skipping the plot: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let outcome = self
            .labeler
            .label_clusters(dataset.documents(), &assignment)
            .await?;

        let report = RunReport {
            documents_total,
            documents_embedded: dataset.len(),
            documents_dropped: dataset.dropped(),
            dimension: dataset.dimension(),
            clusters_found: assignment.cluster_ids().len(),
            cluster_sizes: assignment.sizes(),
            noise_count: assignment.noise_count(),
            labels_parsed: outcome.parsed,
            labels_raw_fallback: outcome.raw_fallback,
            label_calls_failed: outcome.failed_calls,
            projection_ok: projection.is_some(),
        };
        info!(
            "Found {} clusters and {} noise posts",
            report.clusters_found, report.noise_count
        );

        Ok(RunOutput {
            dataset,
            assignment,
            projection,
            labels: outcome.records,
            report,
        })
    }
}
