//! Top-level scan control
//!
//! Chooses between continuous watching and one-shot manual scans, starts the
//! processing worker once video imports are queued, and schedules the next
//! manual scan after each processing run.
//!
//! State is `Idle`, `Watching` or `ManualScanning`. A forced manual scan tears
//! an active watcher down in the background; any request made while a manual
//! scan runs is ignored.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::media::{Category, PathFilter};
use crate::services::import_manager::{CategoryImportStatus, ImportManager};
use crate::services::library_watcher::{InitialScanCallback, LibraryWatcher};
use crate::services::processing::{ProcessingError, ProcessingSupervisor};
use crate::services::scanner::walk_folder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Watching,
    ManualScanning,
}

/// Snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ImportStatus {
    pub state: ScanState,
    pub videos: CategoryImportStatus,
    pub images: CategoryImportStatus,
    pub is_manual_scanning: bool,
    pub is_watching: bool,
    pub is_processing: bool,
    pub manual_scans_started: u64,
}

pub struct ScanOrchestrator {
    config: Arc<Config>,
    filter: Arc<PathFilter>,
    manager: Arc<ImportManager>,
    processing: Arc<ProcessingSupervisor>,
    watcher: Mutex<Option<LibraryWatcher>>,
    manual_scanning: AtomicBool,
    scheduled_scan: Mutex<Option<JoinHandle<()>>>,
    teardown: Mutex<Option<JoinHandle<()>>>,
    manual_scans_started: AtomicU64,
}

struct ScanningGuard<'a>(&'a AtomicBool);

impl Drop for ScanningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanOrchestrator {
    /// Build the orchestrator and wire it to the import queues' drain events
    pub fn new(
        config: Arc<Config>,
        filter: Arc<PathFilter>,
        manager: Arc<ImportManager>,
        processing: Arc<ProcessingSupervisor>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            config,
            filter,
            manager,
            processing,
            watcher: Mutex::new(None),
            manual_scanning: AtomicBool::new(false),
            scheduled_scan: Mutex::new(None),
            teardown: Mutex::new(None),
            manual_scans_started: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&orchestrator);
        orchestrator.manager.on_video_drain(Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                info!(found = this.manager.found_videos_count(), "Video import queue drained");
                tokio::spawn(async move { this.process_library().await });
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(&orchestrator);
        orchestrator.manager.on_image_drain(Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                info!(found = this.manager.found_images_count(), "Image import queue drained");
            }
        }));

        orchestrator
    }

    pub fn state(&self) -> ScanState {
        if self.manual_scanning.load(Ordering::SeqCst) {
            ScanState::ManualScanning
        } else if self.watcher.lock().is_some() {
            ScanState::Watching
        } else {
            ScanState::Idle
        }
    }

    pub fn status(&self) -> ImportStatus {
        let state = self.state();
        ImportStatus {
            state,
            videos: self.manager.category_status(Category::Video),
            images: self.manager.category_status(Category::Image),
            is_manual_scanning: state == ScanState::ManualScanning,
            is_watching: self.watcher.lock().is_some(),
            is_processing: self.processing.is_processing(),
            manual_scans_started: self.manual_scans_started.load(Ordering::SeqCst),
        }
    }

    pub fn has_scheduled_scan(&self) -> bool {
        self.scheduled_scan
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start watching, or run a manual scan when forced or when watching is
    /// not configured. The returned future is `'static` so it can be spawned.
    pub fn scan_folders(self: &Arc<Self>, force_manual: bool) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            if this.manual_scanning.load(Ordering::SeqCst) {
                info!("Manual scan in progress, ignoring scan request");
                return;
            }

            if !force_manual && this.config.watch_library {
                this.start_watching().await;
            } else {
                this.manual_scan().await;
            }
        })
    }

    async fn start_watching(self: &Arc<Self>) {
        if self.watcher.lock().is_some() {
            debug!("Library watcher already running");
            return;
        }

        let teardown = self.teardown.lock().take();
        if let Some(handle) = teardown
            && let Err(e) = handle.await
        {
            error!(error = %e, "Previous watcher teardown failed");
        }

        let weak = Arc::downgrade(self);
        let on_initial_scan: InitialScanCallback = Box::new(move || {
            if let Some(this) = weak.upgrade() {
                info!(
                    videos = this.manager.found_videos_count(),
                    images = this.manager.found_images_count(),
                    "Initial library scan complete"
                );
            }
        });

        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return;
        }
        match LibraryWatcher::new(&self.config, self.manager.clone(), Some(on_initial_scan)) {
            Ok(watcher) => *slot = Some(watcher),
            Err(e) => error!(error = %e, details = ?e, "Could not start library watcher"),
        }
    }

    async fn manual_scan(self: &Arc<Self>) {
        if self
            .manual_scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Manual scan in progress, ignoring scan request");
            return;
        }
        let _scanning = ScanningGuard(&self.manual_scanning);
        let scan_number = self.manual_scans_started.fetch_add(1, Ordering::SeqCst) + 1;
        info!(scan = scan_number, "Starting manual scan");

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            info!("Stopping library watcher for manual scan");
            let handle = tokio::spawn(async move { watcher.stop_watching().await });
            *self.teardown.lock() = Some(handle);
        }

        self.manager.reset_found_videos_count();
        self.manager.reset_found_images_count();

        let videos = self.walk_roots(&self.config.video_paths, Category::Video).await;
        self.manager.import_video_paths(&videos).await;
        info!(found = videos.len(), "Video scan complete");

        let this = self.clone();
        tokio::spawn(async move { this.process_library().await });

        let mut images = 0;
        for root in &self.config.image_paths {
            let files = self.walk_roots(std::slice::from_ref(root), Category::Image).await;
            images += files.len();
            self.manager.import_image_paths(&files).await;
        }
        info!(found = images, "Image scan complete");
    }

    async fn walk_roots(&self, roots: &[PathBuf], category: Category) -> Vec<PathBuf> {
        if !self.filter.patterns().is_empty() {
            debug!(exclusions = ?self.filter.patterns(), "Ignoring excluded files");
        }

        let mut files = Vec::new();
        for root in roots {
            match walk_folder(root, category, self.filter.clone()).await {
                Ok(found) => files.extend(found),
                Err(e) => {
                    error!(root = %root.display(), category = %category, error = %e, details = ?e, "Error scanning folder");
                }
            }
        }
        files
    }

    /// Run the processing worker, then schedule the next manual scan
    pub async fn process_library(self: &Arc<Self>) {
        match self.processing.try_start_processing().await {
            Ok(run) => {
                debug!(?run, "Processing attempt ended");
                self.schedule_manual_scan();
            }
            Err(ProcessingError::AlreadyRunning) => {
                info!("Couldn't start processing: worker already running");
            }
            Err(e) => {
                error!(error = %e, details = ?e, "Couldn't start processing");
            }
        }
    }

    /// Replace any pending rescan with one `SCAN_INTERVAL` from now
    pub fn schedule_manual_scan(self: &Arc<Self>) {
        let previous = self.scheduled_scan.lock().take();
        if let Some(previous) = previous {
            previous.abort();
        }

        let Some(delay) = self.config.scan_interval() else {
            debug!("Scheduled scans disabled");
            return;
        };

        let this = self.clone();
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            info!("Starting scheduled manual scan");
            // Own task, so replacing the timer never aborts a running scan
            tokio::spawn(this.scan_folders(true));
        });
        *self.scheduled_scan.lock() = Some(handle);

        info!(delay_ms = delay.as_millis() as u64, "Next manual scan scheduled");
    }

    /// Stop watching and cancel the pending rescan. Never fails.
    pub async fn destroy_importer(&self) {
        let scheduled = self.scheduled_scan.lock().take();
        if let Some(handle) = scheduled {
            handle.abort();
        }

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop_watching().await;
        }

        let teardown = self.teardown.lock().take();
        if let Some(handle) = teardown
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Watcher teardown failed");
        }

        info!("Importer stopped");
    }
}
