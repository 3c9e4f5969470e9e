use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::AppResult;

/// A single forum post as handed over by the ingestion step.
///
/// `row_id` is the position of the post in the ingested table and never changes afterwards,
/// so it survives the filtering done during alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub row_id: usize,
    #[serde(default)]
    pub title: String,
    /// Text sent to the embedding service.
    pub text: String,
    /// Any other columns of the ingested table, carried through untouched.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new<T: Into<String>, S: Into<String>>(row_id: usize, title: T, text: S) -> Self {
        Self {
            row_id,
            title: title.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }
}

/// Wire shape of an ingested record. Field aliases cover the column names used by the scraper.
#[derive(Debug, Deserialize)]
struct IngestedRecord {
    #[serde(default, alias = "titulo")]
    title: Option<String>,
    #[serde(default, alias = "texto_final")]
    text: Option<String>,
    #[serde(flatten)]
    metadata: Map<String, Value>,
}

impl IngestedRecord {
    fn into_document(self, row_id: usize) -> Document {
        let mut metadata = self.metadata;
        metadata.remove("row_id");
        Document {
            row_id,
            title: self.title.unwrap_or_default().trim().to_string(),
            text: self.text.unwrap_or_default(),
            metadata,
        }
    }
}

/// Parse documents from either a JSON array or JSON Lines. Row ids follow input order.
pub fn parse_documents(raw: &str) -> AppResult<Vec<Document>> {
    let records: Vec<IngestedRecord> = if raw.trim_start().starts_with('[') {
        let jd = &mut serde_json::Deserializer::from_str(raw);
        match serde_path_to_error::deserialize(jd) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to parse document table at path: {}", e.path());
                return Err(e.into_inner().into());
            }
        }
    } else {
        let mut records = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Failed to parse document on line {}: {e}", line_no + 1);
                    return Err(e.into());
                }
            }
        }
        records
    };

    Ok(records
        .into_iter()
        .enumerate()
        .map(|(row_id, record)| record.into_document(row_id))
        .collect())
}

/// Load the ingested document table from disk.
#[tracing::instrument(name = "Loading documents", level = "info")]
pub async fn load_documents<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<Vec<Document>> {
    let raw = tokio::fs::read_to_string(&path).await?;
    let documents = parse_documents(&raw)?;
    info!("Loaded {} documents", documents.len());
    debug!(
        "Documents with empty text: {}",
        documents.iter().filter(|d| d.text.trim().is_empty()).count()
    );
    Ok(documents)
}
