//! Watch mode: observes the configured library roots and feeds the import manager

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::media::Category;
use crate::services::import_manager::ImportManager;
use crate::services::watcher::{ChangeWatcher, WatcherOptions};

/// Build one recursive glob per root and supported extension, in order and
/// without duplicates. Roots are made absolute and escaped.
pub fn create_watch_paths(video_paths: &[PathBuf], image_paths: &[PathBuf]) -> Vec<String> {
    let mut globs: Vec<String> = Vec::new();
    let categories = [(Category::Video, video_paths), (Category::Image, image_paths)];

    for (category, roots) in categories {
        for root in roots {
            let root = std::path::absolute(root).unwrap_or_else(|_| root.clone());
            let root = root.to_string_lossy();
            let root = globset::escape(root.trim_end_matches('/'));
            for ext in category.extensions() {
                let glob = format!("{root}/**/*{ext}");
                if !globs.contains(&glob) {
                    globs.push(glob);
                }
            }
        }
    }

    globs
}

pub type InitialScanCallback = Box<dyn FnOnce() + Send>;

/// Owns the change watcher for the library roots.
///
/// Discovered paths travel through a channel to one forwarding task, so the
/// import manager sees them in discovery order.
pub struct LibraryWatcher {
    watcher: ChangeWatcher,
    forwarder: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LibraryWatcher {
    pub fn new(
        config: &Config,
        manager: Arc<ImportManager>,
        on_initial_scan_completed: Option<InitialScanCallback>,
    ) -> Result<Self> {
        let globs = create_watch_paths(&config.video_paths, &config.image_paths);
        info!(globs = ?globs, exclusions = ?config.exclude_files, "Starting library watcher");

        let (path_tx, mut path_rx) = mpsc::unbounded_channel::<PathBuf>();
        let forward_manager = manager.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(path) = path_rx.recv().await {
                forward_manager.import_paths(std::slice::from_ref(&path)).await;
            }
        });

        let options = WatcherOptions {
            poll_interval: config.watch_polling_interval,
            write_settle: config.watch_write_settle,
            settle_check: Duration::from_millis(100),
        };

        let watcher = ChangeWatcher::new(
            &globs,
            &config.exclude_files,
            options,
            Arc::new(move |path| {
                let _ = path_tx.send(path);
            }),
            Box::new(move || {
                info!("Library watcher finished its initial scan");
                manager.mark_initial_scan_complete();
                if let Some(callback) = on_initial_scan_completed {
                    callback();
                }
            }),
        );

        let watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                forwarder.abort();
                return Err(e);
            }
        };

        Ok(Self {
            watcher,
            forwarder: tokio::sync::Mutex::new(Some(forwarder)),
        })
    }

    /// Stop watching and finish forwarding what was already discovered
    pub async fn stop_watching(&self) {
        self.watcher.stop_watching().await;

        // The watcher task owned the only sender; once it is gone the forwarder ends
        let mut forwarder = self.forwarder.lock().await;
        if let Some(handle) = forwarder.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "Library watcher forwarder failed");
        }
        info!("Library watcher stopped");
    }
}
