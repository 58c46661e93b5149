//! The processing worker, run in its own process with `--process-queue`

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::db::{LibraryItemRecord, MediaStore, ProcessedUpdate};

/// Per-item heavy work done by the worker
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &LibraryItemRecord) -> Result<ProcessedUpdate>;
}

/// Records the current file size and the sniffed MIME type
pub struct FileProbe;

#[async_trait]
impl ItemProcessor for FileProbe {
    async fn process(&self, item: &LibraryItemRecord) -> Result<ProcessedUpdate> {
        let path = PathBuf::from(&item.path);
        tokio::task::spawn_blocking(move || {
            let size = std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .len();
            let kind = infer::get_from_path(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            Ok::<_, anyhow::Error>(ProcessedUpdate {
                size_bytes: Some(size as i64),
                mime_type: kind.map(|k| k.mime_type().to_string()),
                error: None,
            })
        })
        .await
        .context("File probe panicked")?
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Drain every store entry that needs processing, one at a time.
///
/// A failing item is marked with its error so it cannot stall the loop.
pub async fn run_processing_worker(
    store: &dyn MediaStore,
    processor: &dyn ItemProcessor,
) -> Result<WorkerSummary> {
    let mut summary = WorkerSummary::default();
    info!("Processing worker started");

    while let Some(item) = store.next_needing_processing().await? {
        let update = match processor.process(&item).await {
            Ok(update) => {
                summary.processed += 1;
                info!(id = item.id, path = %item.path, mime_type = ?update.mime_type, "Processed item");
                update
            }
            Err(e) => {
                summary.failed += 1;
                error!(id = item.id, path = %item.path, error = %e, details = ?e, "Processing failed");
                ProcessedUpdate {
                    error: Some(format!("{e:#}")),
                    ..Default::default()
                }
            }
        };
        store.mark_processed(item.id, update).await?;
    }

    info!(processed = summary.processed, failed = summary.failed, "Processing worker finished");
    Ok(summary)
}
