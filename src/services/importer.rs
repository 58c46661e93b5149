//! Import collaborator invoked by the category queues

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::db::{CreateLibraryItem, MediaStore};
use crate::media::{Category, DiscoveredPath};

/// Per-item knobs decided by the queue at the moment the item is imported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportContext {
    pub read_image_dimensions: bool,
}

/// Records one discovered file in the library
#[async_trait]
pub trait MediaImporter: Send + Sync {
    async fn import(&self, item: &DiscoveredPath, ctx: ImportContext) -> Result<()>;
}

/// Default importer: writes a library entry per file.
///
/// Videos are flagged for the processing worker; images are complete after
/// import, optionally with their pixel dimensions.
pub struct StoreImporter {
    store: Arc<dyn MediaStore>,
}

impl StoreImporter {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MediaImporter for StoreImporter {
    async fn import(&self, item: &DiscoveredPath, ctx: ImportContext) -> Result<()> {
        let metadata = tokio::fs::metadata(&item.path)
            .await
            .with_context(|| format!("Failed to stat {}", item.path.display()))?;

        let (width, height) = match item.category {
            Category::Image if ctx.read_image_dimensions => {
                match read_dimensions(&item.path).await {
                    Ok((w, h)) => (Some(i64::from(w)), Some(i64::from(h))),
                    Err(e) => {
                        warn!(path = %item.path.display(), error = %e, "Could not read image dimensions");
                        (None, None)
                    }
                }
            }
            _ => (None, None),
        };

        let record = self
            .store
            .insert(CreateLibraryItem {
                path: item.path.to_string_lossy().into_owned(),
                category: item.category.as_str().to_string(),
                size_bytes: metadata.len() as i64,
                width,
                height,
                needs_processing: item.category == Category::Video,
            })
            .await
            .with_context(|| format!("Failed to store {}", item.path.display()))?;

        info!(
            id = record.id,
            category = %item.category,
            path = %item.path.display(),
            "Imported media file"
        );
        debug!(size_bytes = record.size_bytes, width = ?record.width, height = ?record.height, "Import details");

        Ok(())
    }
}

async fn read_dimensions(path: &Path) -> Result<(u32, u32)> {
    let path = path.to_path_buf();
    let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
        .await
        .context("Dimension reader panicked")??;
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<Database>, StoreImporter, tempfile::TempDir) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let importer = StoreImporter::new(db.clone());
        (db, importer, tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_import_video_flags_processing() {
        let (db, importer, dir) = setup().await;
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        importer
            .import(&DiscoveredPath::new(&path, Category::Video), ImportContext::default())
            .await
            .unwrap();

        let record = db.find_by_path(&path).await.unwrap().unwrap();
        assert_eq!(record.size_bytes, 10);
        assert!(record.needs_processing);
        assert_eq!(record.category, "video");
    }

    #[tokio::test]
    async fn test_import_image_reads_dimensions_when_asked() {
        let (db, importer, dir) = setup().await;
        let with_dims = dir.path().join("a.png");
        let without_dims = dir.path().join("b.png");
        image::RgbImage::new(3, 2).save(&with_dims).unwrap();
        image::RgbImage::new(3, 2).save(&without_dims).unwrap();

        importer
            .import(
                &DiscoveredPath::new(&with_dims, Category::Image),
                ImportContext { read_image_dimensions: true },
            )
            .await
            .unwrap();
        importer
            .import(&DiscoveredPath::new(&without_dims, Category::Image), ImportContext::default())
            .await
            .unwrap();

        let record = db.find_by_path(&with_dims).await.unwrap().unwrap();
        assert_eq!((record.width, record.height), (Some(3), Some(2)));
        assert!(!record.needs_processing);

        let record = db.find_by_path(&without_dims).await.unwrap().unwrap();
        assert_eq!((record.width, record.height), (None, None));
    }

    #[tokio::test]
    async fn test_import_missing_file_fails() {
        let (_db, importer, dir) = setup().await;
        let result = importer
            .import(
                &DiscoveredPath::new(dir.path().join("gone.mp4"), Category::Video),
                ImportContext::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
