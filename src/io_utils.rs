use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::AppResult;
use crate::ai::label_clusters::ClusterLabelRecord;
use crate::classify::{RunOutput, RunReport};
use crate::document::Document;
use crate::plot::render_svg;

pub const POSTS_FILE: &str = "posts_with_clusters.json";
pub const LABELS_FILE: &str = "cluster_labels.json";
pub const PLOT_FILE: &str = "projection.svg";
pub const REPORT_FILE: &str = "run_report.json";

/// A post as written out: every ingested field plus its cluster label.
#[derive(Debug, Serialize)]
pub struct LabeledDocument<'a> {
    #[serde(flatten)]
    pub document: &'a Document,
    pub cluster: i32,
}

/// Contents of the run report file.
#[derive(Debug, Serialize)]
pub struct RunMetadata<'a, C> {
    #[serde(serialize_with = "crate::serde_helpers::rfc3339::serialize")]
    pub started_at: OffsetDateTime,
    #[serde(serialize_with = "crate::serde_helpers::rfc3339::serialize")]
    pub finished_at: OffsetDateTime,
    pub config: &'a C,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

/// Write every artifact of a run into `dir`, creating it if needed. Returns the written paths.
#[tracing::instrument(name = "Saving output to disk", level = "debug", skip(output, metadata))]
pub async fn write_artifacts<C: Serialize>(
    dir: &Path,
    output: &RunOutput,
    metadata: &RunMetadata<'_, C>,
) -> AppResult<Vec<PathBuf>> {
    fs::create_dir_all(dir).await?;
    let mut written = Vec::new();

    let posts: Vec<LabeledDocument<'_>> = output
        .dataset
        .documents()
        .iter()
        .zip(output.assignment.labels())
        .map(|(document, &cluster)| LabeledDocument { document, cluster })
        .collect();
    let path = dir.join(POSTS_FILE);
    write_json_output(&path, &posts).await?;
    written.push(path);

    // JSON object keys must be strings.
    let labels: BTreeMap<String, &ClusterLabelRecord> = output
        .labels
        .iter()
        .map(|(id, record)| (id.to_string(), record))
        .collect();
    let path = dir.join(LABELS_FILE);
    write_json_output(&path, &labels).await?;
    written.push(path);

    if let Some(points) = &output.projection {
        let svg = render_svg(
            points,
            output.assignment.labels(),
            "Post embeddings by cluster",
        )?;
        let path = dir.join(PLOT_FILE);
        write_file(&path, svg).await?;
        written.push(path);
    } else {
        debug!("No projection available; skipping {}", PLOT_FILE);
    }

    let path = dir.join(REPORT_FILE);
    write_json_output(&path, metadata).await?;
    written.push(path);

    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

/// Serialize an object to pretty JSON and write it to disk.
#[tracing::instrument(name = "Writing JSON file", level = "trace", skip(obj))]
pub async fn write_json_output<P: AsRef<Path> + std::fmt::Debug, S: Serialize>(
    output: P,
    obj: &S,
) -> AppResult<()> {
    let data = serde_json::to_string_pretty(obj)?;
    write_file(output, data).await
}

/// Write raw string data to a file, overwriting any existing content.
async fn write_file<P: AsRef<Path> + std::fmt::Debug>(output: P, data: String) -> AppResult<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
