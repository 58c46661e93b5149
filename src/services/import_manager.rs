//! Fan-in point for discovered paths
//!
//! Owns the video and image queues together with their discovery counters.
//! Watchers forward every path to both categories; each queue discards what
//! its own filter rejects.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::db::MediaStore;
use crate::media::{Category, PathFilter};
use crate::services::import_queue::{
    AddOutcome, CategoryImportQueue, DrainListener, ImageReadPolicy,
};
use crate::services::importer::MediaImporter;

/// Status triple reported per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryImportStatus {
    pub found_count: usize,
    pub queue_length: usize,
    pub running: bool,
}

pub struct ImportManager {
    videos: CategoryImportQueue,
    images: CategoryImportQueue,
    found_videos: AtomicUsize,
    found_images: AtomicUsize,
    read_policy: Arc<ImageReadPolicy>,
}

impl ImportManager {
    pub fn new(
        filter: Arc<PathFilter>,
        store: Arc<dyn MediaStore>,
        importer: Arc<dyn MediaImporter>,
        read_images_on_import: bool,
    ) -> Self {
        let read_policy = Arc::new(ImageReadPolicy::new(read_images_on_import));
        Self {
            videos: CategoryImportQueue::new(
                Category::Video,
                filter.clone(),
                store.clone(),
                importer.clone(),
                read_policy.clone(),
            ),
            images: CategoryImportQueue::new(
                Category::Image,
                filter,
                store,
                importer,
                read_policy.clone(),
            ),
            found_videos: AtomicUsize::new(0),
            found_images: AtomicUsize::new(0),
            read_policy,
        }
    }

    /// Forward every path to both category queues
    pub async fn import_paths(&self, paths: &[PathBuf]) {
        self.import_video_paths(paths).await;
        self.import_image_paths(paths).await;
    }

    pub async fn import_video_paths(&self, paths: &[PathBuf]) {
        for path in paths {
            self.found_videos.fetch_add(1, Ordering::SeqCst);
            submit(&self.videos, path).await;
        }
    }

    pub async fn import_image_paths(&self, paths: &[PathBuf]) {
        for path in paths {
            self.found_images.fetch_add(1, Ordering::SeqCst);
            submit(&self.images, path).await;
        }
    }

    pub fn queue(&self, category: Category) -> &CategoryImportQueue {
        match category {
            Category::Video => &self.videos,
            Category::Image => &self.images,
        }
    }

    pub fn found_count(&self, category: Category) -> usize {
        self.counter(category).load(Ordering::SeqCst)
    }

    pub fn reset_found_count(&self, category: Category) {
        self.counter(category).store(0, Ordering::SeqCst);
    }

    pub fn found_videos_count(&self) -> usize {
        self.found_count(Category::Video)
    }

    pub fn found_images_count(&self) -> usize {
        self.found_count(Category::Image)
    }

    pub fn reset_found_videos_count(&self) {
        self.reset_found_count(Category::Video);
    }

    pub fn reset_found_images_count(&self) {
        self.reset_found_count(Category::Image);
    }

    pub fn on_video_drain(&self, listener: DrainListener) {
        self.videos.on_drain(listener);
    }

    pub fn on_image_drain(&self, listener: DrainListener) {
        self.images.on_drain(listener);
    }

    pub fn subscribe_drain(&self, category: Category) -> watch::Receiver<u64> {
        self.queue(category).subscribe_drain()
    }

    /// From now on image imports read pixel dimensions
    pub fn mark_initial_scan_complete(&self) {
        self.read_policy.mark_initial_scan_complete();
    }

    pub fn category_status(&self, category: Category) -> CategoryImportStatus {
        let queue = self.queue(category);
        CategoryImportStatus {
            found_count: self.found_count(category),
            queue_length: queue.len(),
            running: queue.is_processing(),
        }
    }

    fn counter(&self, category: Category) -> &AtomicUsize {
        match category {
            Category::Video => &self.found_videos,
            Category::Image => &self.found_images,
        }
    }
}

async fn submit(queue: &CategoryImportQueue, path: &Path) {
    match queue.add_path_to_queue(path).await {
        Ok(AddOutcome::Queued | AddOutcome::Rejected) => {}
        Ok(outcome) => {
            debug!(queue = %queue.category(), path = %path.display(), ?outcome, "Skipped path");
        }
        Err(e) => {
            error!(queue = %queue.category(), path = %path.display(), error = %e, details = ?e, "Could not queue path");
        }
    }
}
