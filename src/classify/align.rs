use ndarray::Array2;
use tracing::{debug, warn};

use crate::AppResult;
use crate::classify::convert::embeddings_to_ndarray;
use crate::classify::embed::EmbeddingResult;
use crate::document::Document;
use crate::error::AppError;

/// Documents that received an embedding, paired row-for-row with their vectors.
///
/// `documents()[i]` is the post whose vector is `matrix().row(i)`. Documents without a vector are
/// dropped rather than padded, so the matrix never holds placeholder rows.
#[derive(Debug, Clone)]
pub struct AlignedDataset {
    documents: Vec<Document>,
    matrix: Array2<f64>,
    dropped: usize,
}

impl AlignedDataset {
    /// Apply the keep-mask `results[i] != Absent` to both the documents and the vectors.
    ///
    /// # Panics
    /// When `documents` and `results` differ in length; that is a bug in the caller and would
    /// silently shift every later row onto the wrong post.
    #[tracing::instrument(name = "Aligning documents with embeddings", level = "debug", skip_all)]
    pub fn align(documents: Vec<Document>, results: Vec<EmbeddingResult>) -> AppResult<Self> {
        assert_eq!(
            documents.len(),
            results.len(),
            "every document needs exactly one embedding result"
        );

        let keep: Vec<bool> = results.iter().map(|r| !r.is_absent()).collect();
        let dropped = keep.iter().filter(|k| !**k).count();

        let vectors: Vec<&[f32]> = results
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .filter_map(|(r, _)| r.as_vector())
            .collect();
        let kept: Vec<Document> = documents
            .into_iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(d, _)| d)
            .collect();

        if let Some(first) = vectors.first() {
            let expected = first.len();
            for (doc, v) in kept.iter().zip(&vectors) {
                if v.len() != expected {
                    return Err(AppError::DimensionMismatch {
                        row_id: doc.row_id,
                        expected,
                        found: v.len(),
                    });
                }
            }
        }

        let matrix = embeddings_to_ndarray(&vectors);
        if dropped > 0 {
            warn!("Dropped {} documents without an embedding", dropped);
        }
        debug!("Aligned matrix shape: {:?}", matrix.dim());

        Ok(Self {
            documents: kept,
            matrix,
            dropped,
        })
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Documents removed because their embedding was absent.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Embedding dimensionality, unknown when nothing survived.
    pub fn dimension(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.matrix.ncols())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(i, format!("title {i}"), format!("text {i}")))
            .collect()
    }

    #[test]
    fn absent_rows_are_dropped_on_both_sides_in_order() {
        let results = vec![
            EmbeddingResult::Vector(vec![0.0, 1.0]),
            EmbeddingResult::Absent,
            EmbeddingResult::Vector(vec![2.0, 3.0]),
            EmbeddingResult::Absent,
            EmbeddingResult::Vector(vec![4.0, 5.0]),
        ];
        let aligned = AlignedDataset::align(docs(5), results).unwrap();

        assert_eq!(aligned.len(), aligned.matrix().nrows());
        assert_eq!(aligned.dropped(), 2);
        assert_eq!(aligned.dimension(), Some(2));
        let ids: Vec<usize> = aligned.documents().iter().map(|d| d.row_id).collect();
        assert_eq!(ids, vec![0, 2, 4]);
        for (doc, row) in aligned.documents().iter().zip(aligned.matrix().rows()) {
            assert_eq!(row[0], doc.row_id as f64);
            assert_eq!(row[1], doc.row_id as f64 + 1.0);
        }
    }

    #[test]
    fn no_zero_rows_are_synthesised_for_failures() {
        let results = vec![
            EmbeddingResult::Absent,
            EmbeddingResult::Vector(vec![1.0, 1.0]),
            EmbeddingResult::Absent,
        ];
        let aligned = AlignedDataset::align(docs(3), results).unwrap();
        assert_eq!(aligned.matrix().nrows(), 1);
        assert!(aligned.matrix().rows().into_iter().all(|r| r.iter().any(|&x| x != 0.0)));
    }

    #[test]
    fn genuine_zero_vector_is_kept() {
        let results = vec![EmbeddingResult::Vector(vec![0.0, 0.0])];
        let aligned = AlignedDataset::align(docs(1), results).unwrap();
        assert_eq!(aligned.len(), 1);
    }

    #[test]
    fn everything_absent_gives_an_empty_dataset() {
        let aligned =
            AlignedDataset::align(docs(2), vec![EmbeddingResult::Absent; 2]).unwrap();
        assert!(aligned.is_empty());
        assert_eq!(aligned.dimension(), None);
        assert_eq!(aligned.dropped(), 2);
    }

    #[test]
    fn inconsistent_dimensions_are_rejected() {
        let results = vec![
            EmbeddingResult::Vector(vec![1.0, 2.0]),
            EmbeddingResult::Vector(vec![1.0, 2.0, 3.0]),
        ];
        let err = AlignedDataset::align(docs(2), results).unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                row_id: 1,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    #[should_panic(expected = "exactly one embedding result")]
    fn length_mismatch_panics() {
        let _ = AlignedDataset::align(docs(3), vec![EmbeddingResult::Absent; 2]);
    }
}
