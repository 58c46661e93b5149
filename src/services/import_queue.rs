//! Per-category serialized import queue
//!
//! Each media category owns one queue. Paths pass the category filter, are
//! checked against the library store and are then imported strictly one at a
//! time by a dedicated worker task. A failing or panicking import is logged
//! and the worker moves on to the next path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::db::MediaStore;
use crate::media::{Category, DiscoveredPath, PathFilter};
use crate::services::importer::{ImportContext, MediaImporter};

/// Callback run whenever a queue goes from non-empty to empty
pub type DrainListener = Arc<dyn Fn() + Send + Sync>;

/// What `add_path_to_queue` did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Not importable for this category
    Rejected,
    /// Already waiting in or being processed by this queue
    AlreadyQueued,
    /// Already present in the library store
    Duplicate,
    Queued,
}

/// Decides whether image imports read pixel dimensions.
///
/// Dimensions are read once the initial watch scan has completed, or always
/// when configured to.
#[derive(Debug, Default)]
pub struct ImageReadPolicy {
    read_on_import: bool,
    initial_scan_complete: AtomicBool,
}

impl ImageReadPolicy {
    pub fn new(read_on_import: bool) -> Self {
        Self {
            read_on_import,
            initial_scan_complete: AtomicBool::new(false),
        }
    }

    pub fn mark_initial_scan_complete(&self) {
        self.initial_scan_complete.store(true, Ordering::SeqCst);
    }

    pub fn should_read(&self) -> bool {
        self.read_on_import || self.initial_scan_complete.load(Ordering::SeqCst)
    }
}

/// Drain observers plus a generation counter for awaiting the next drain
struct DrainSignal {
    listeners: RwLock<Vec<DrainListener>>,
    generation: watch::Sender<u64>,
}

impl DrainSignal {
    fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            generation: watch::Sender::new(0),
        }
    }

    fn fire(&self) {
        // Listeners may register further listeners, so call them outside the lock
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener();
        }
        self.generation.send_modify(|g| *g += 1);
    }
}

struct QueueShared {
    /// Items sent to the worker and not yet picked up
    pending: AtomicUsize,
    processing: AtomicBool,
    /// Paths between reservation in `add_path_to_queue` and the end of their import
    in_flight: Mutex<HashSet<PathBuf>>,
    drain: DrainSignal,
}

impl QueueShared {
    fn release(&self, path: &Path) {
        self.in_flight.lock().remove(path);
    }
}

/// A concurrency-1 import queue for one media category
pub struct CategoryImportQueue {
    category: Category,
    filter: Arc<PathFilter>,
    store: Arc<dyn MediaStore>,
    sender: mpsc::UnboundedSender<DiscoveredPath>,
    shared: Arc<QueueShared>,
}

impl CategoryImportQueue {
    /// Create the queue and spawn its worker. Must be called inside a runtime.
    pub fn new(
        category: Category,
        filter: Arc<PathFilter>,
        store: Arc<dyn MediaStore>,
        importer: Arc<dyn MediaImporter>,
        read_policy: Arc<ImageReadPolicy>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            pending: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            drain: DrainSignal::new(),
        });

        tokio::spawn(run_worker(
            category,
            receiver,
            shared.clone(),
            importer,
            read_policy,
        ));

        Self {
            category,
            filter,
            store,
            sender,
            shared,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Filter the path, check the store, and enqueue it if it is new
    pub async fn add_path_to_queue(&self, path: &Path) -> Result<AddOutcome> {
        if !self.filter.is_importable(path, self.category) {
            debug!(queue = %self.category, path = %path.display(), "Ignoring non-importable path");
            return Ok(AddOutcome::Rejected);
        }

        if !self.shared.in_flight.lock().insert(path.to_path_buf()) {
            debug!(queue = %self.category, path = %path.display(), "Path already queued");
            return Ok(AddOutcome::AlreadyQueued);
        }

        let existing = match self.store.find_by_path(path).await {
            Ok(existing) => existing,
            Err(e) => {
                self.shared.release(path);
                return Err(e.context(format!("Store lookup failed for {}", path.display())));
            }
        };

        if let Some(record) = existing {
            self.shared.release(path);
            debug!(queue = %self.category, path = %path.display(), id = record.id, "Path already in library");
            return Ok(AddOutcome::Duplicate);
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .sender
            .send(DiscoveredPath::new(path, self.category))
            .is_err()
        {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            self.shared.release(path);
            return Err(anyhow!("{} import worker has stopped", self.category)
                .context(format!("Could not enqueue {}", path.display())));
        }

        info!(queue = %self.category, path = %path.display(), "Added path to import queue");
        Ok(AddOutcome::Queued)
    }

    /// Number of items waiting, excluding the one being imported
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while an item is being imported
    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    /// Register a drain listener. Listeners run in registration order.
    pub fn on_drain(&self, listener: DrainListener) {
        self.shared.drain.listeners.write().push(listener);
    }

    /// Receiver whose value changes on every drain
    pub fn subscribe_drain(&self) -> watch::Receiver<u64> {
        self.shared.drain.generation.subscribe()
    }
}

async fn run_worker(
    category: Category,
    mut receiver: mpsc::UnboundedReceiver<DiscoveredPath>,
    shared: Arc<QueueShared>,
    importer: Arc<dyn MediaImporter>,
    read_policy: Arc<ImageReadPolicy>,
) {
    info!(queue = %category, "Import queue started");

    while let Some(item) = receiver.recv().await {
        shared.processing.store(true, Ordering::SeqCst);
        shared.pending.fetch_sub(1, Ordering::SeqCst);

        let ctx = ImportContext {
            read_image_dimensions: category == Category::Image && read_policy.should_read(),
        };

        debug!(queue = %category, path = %item.path.display(), "Importing");

        // Separate task so a panicking importer only loses this item
        let task = {
            let importer = importer.clone();
            let item = item.clone();
            tokio::spawn(async move { importer.import(&item, ctx).await })
        };

        match task.await {
            Ok(Ok(())) => {
                debug!(queue = %category, path = %item.path.display(), "Import completed");
            }
            Ok(Err(e)) => {
                error!(
                    queue = %category,
                    path = %item.path.display(),
                    error = %e,
                    details = ?e,
                    "Import failed"
                );
            }
            Err(e) => {
                error!(
                    queue = %category,
                    path = %item.path.display(),
                    error = %e,
                    "Import task panicked"
                );
            }
        }

        shared.release(&item.path);
        shared.processing.store(false, Ordering::SeqCst);

        if shared.pending.load(Ordering::SeqCst) == 0 {
            debug!(queue = %category, "Import queue drained");
            shared.drain.fire();
        }
    }

    info!(queue = %category, "Import queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, RecordingImporter};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn queue(
        category: Category,
        store: Arc<MemoryStore>,
        importer: Arc<RecordingImporter>,
    ) -> CategoryImportQueue {
        CategoryImportQueue::new(
            category,
            Arc::new(PathFilter::permissive()),
            store,
            importer,
            Arc::new(ImageReadPolicy::new(false)),
        )
    }

    async fn wait_for_drain(rx: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("queue did not drain")
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_more_than_one_import_in_flight() {
        let store = MemoryStore::new();
        let importer = Arc::new(RecordingImporter::new().with_delay(Duration::from_millis(10)));
        let queue = queue(Category::Video, store, importer.clone());
        let mut drained = queue.subscribe_drain();

        let paths: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("/lib/{i}.mp4"))).collect();
        let outcomes = futures::future::join_all(paths.iter().map(|p| queue.add_path_to_queue(p))).await;
        assert!(outcomes.iter().all(|o| matches!(o, Ok(AddOutcome::Queued))));

        while importer.imported().len() < 5 {
            wait_for_drain(&mut drained).await;
        }

        assert_eq!(importer.max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn test_rejects_non_importable_paths() {
        let store = MemoryStore::new();
        let importer = Arc::new(RecordingImporter::new());
        let queue = queue(Category::Video, store.clone(), importer);

        assert_eq!(queue.add_path_to_queue(Path::new("/lib/b.avi")).await.unwrap(), AddOutcome::Rejected);
        assert_eq!(
            queue.add_path_to_queue(Path::new("/lib/.hidden.mp4")).await.unwrap(),
            AddOutcome::Rejected
        );
        // Rejected before the store is consulted
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_same_path_twice_imports_once() {
        let store = MemoryStore::new();
        let importer = Arc::new(
            RecordingImporter::new()
                .writing_to(store.clone())
                .with_delay(Duration::from_millis(20)),
        );
        let queue = queue(Category::Video, store.clone(), importer.clone());
        let mut drained = queue.subscribe_drain();
        let path = Path::new("/lib/a.mp4");

        let (first, second) = tokio::join!(queue.add_path_to_queue(path), queue.add_path_to_queue(path));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o == AddOutcome::Queued);
        assert_eq!(outcomes, vec![AddOutcome::AlreadyQueued, AddOutcome::Queued]);

        wait_for_drain(&mut drained).await;
        assert_eq!(importer.imported(), vec![path.to_path_buf()]);

        // Once committed, the store lookup catches it
        assert_eq!(queue.add_path_to_queue(path).await.unwrap(), AddOutcome::Duplicate);
        assert_eq!(importer.imported().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_queue() {
        let store = MemoryStore::new();
        let importer = Arc::new(
            RecordingImporter::new()
                .failing_on("bad.mp4")
                .panicking_on("boom.mp4"),
        );
        let queue = queue(Category::Video, store, importer.clone());
        let mut drained = queue.subscribe_drain();

        for name in ["bad.mp4", "boom.mp4", "good.mp4"] {
            queue.add_path_to_queue(&Path::new("/lib").join(name)).await.unwrap();
        }

        while !importer.imported().contains(&PathBuf::from("/lib/good.mp4")) {
            wait_for_drain(&mut drained).await;
        }

        assert_eq!(importer.imported(), vec![PathBuf::from("/lib/good.mp4")]);
        assert_eq!(queue.len(), 0);

        // A failed path is released and can be queued again
        assert_eq!(
            queue.add_path_to_queue(Path::new("/lib/bad.mp4")).await.unwrap(),
            AddOutcome::Queued
        );
    }

    #[tokio::test]
    async fn test_drain_listeners_run_in_registration_order() {
        let store = MemoryStore::new();
        let importer = Arc::new(RecordingImporter::new());
        let queue = queue(Category::Image, store, importer);
        let calls = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=3 {
            let calls = calls.clone();
            queue.on_drain(Arc::new(move || calls.lock().push(n)));
        }

        let mut drained = queue.subscribe_drain();
        queue.add_path_to_queue(Path::new("/pics/a.jpg")).await.unwrap();
        wait_for_drain(&mut drained).await;
        assert_eq!(*calls.lock(), vec![1, 2, 3]);

        queue.add_path_to_queue(Path::new("/pics/b.jpg")).await.unwrap();
        wait_for_drain(&mut drained).await;
        assert_eq!(*calls.lock(), vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(*drained.borrow(), 2);
    }

    #[tokio::test]
    async fn test_image_read_policy_reaches_importer() {
        let store = MemoryStore::new();
        let importer = Arc::new(RecordingImporter::new());
        let policy = Arc::new(ImageReadPolicy::new(false));
        let queue = CategoryImportQueue::new(
            Category::Image,
            Arc::new(PathFilter::permissive()),
            store,
            importer.clone(),
            policy.clone(),
        );
        let mut drained = queue.subscribe_drain();

        queue.add_path_to_queue(Path::new("/pics/a.jpg")).await.unwrap();
        wait_for_drain(&mut drained).await;
        policy.mark_initial_scan_complete();
        queue.add_path_to_queue(Path::new("/pics/b.jpg")).await.unwrap();
        wait_for_drain(&mut drained).await;

        let reads: Vec<bool> = importer
            .contexts
            .lock()
            .iter()
            .map(|c| c.read_image_dimensions)
            .collect();
        assert_eq!(reads, vec![false, true]);
    }
}
