//! Full directory walks used by manual scans

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::media::{Category, PathFilter};

/// Recursively collect the importable files of one category under `root`.
///
/// Fails when the root itself cannot be read; unreadable entries below it are
/// logged and skipped.
pub async fn walk_folder(
    root: &Path,
    category: Category,
    filter: Arc<PathFilter>,
) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(root)
        .await
        .with_context(|| format!("Cannot read {category} folder {}", root.display()))?;
    if !metadata.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect(&root, category, &filter))
        .await
        .context("Folder walk panicked")?;

    Ok(files)
}

fn collect(root: &Path, category: Category, filter: &PathFilter) -> Vec<PathBuf> {
    info!(root = %root.display(), category = %category, "Scanning folder");

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if filter.is_importable(path, category) {
            debug!(path = %path.display(), "Found file");
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    info!(root = %root.display(), total = files.len(), category = %category, "Folder scan finished");
    files
}
