//! In-memory collaborators for unit tests

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::db::{CreateLibraryItem, LibraryItemRecord, MediaStore, ProcessedUpdate};
use crate::media::DiscoveredPath;
use crate::services::importer::{ImportContext, MediaImporter};
use crate::services::processing::{WorkerExit, WorkerLauncher};

/// Store keeping records in a map. Lookups can be held back with a gate.
pub struct MemoryStore {
    items: Mutex<HashMap<String, LibraryItemRecord>>,
    next_id: AtomicUsize,
    gate: watch::Sender<bool>,
    pub lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            gate: watch::Sender::new(true),
            lookups: AtomicUsize::new(0),
        })
    }

    /// A store whose lookups wait until `open_gate` is called
    pub fn gated() -> Arc<Self> {
        let store = Self::new();
        store.gate.send_replace(false);
        store
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.items.lock().contains_key(&*path.to_string_lossy())
    }

    /// Seed a record that still needs processing
    pub fn seed_unprocessed(&self, path: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        self.items.lock().insert(path.to_string(), record(id, path, true));
    }
}

fn record(id: i64, path: &str, needs_processing: bool) -> LibraryItemRecord {
    LibraryItemRecord {
        id,
        path: path.to_string(),
        category: "video".to_string(),
        size_bytes: 0,
        mime_type: None,
        width: None,
        height: None,
        needs_processing,
        processing_error: None,
        imported_at: Utc::now(),
        processed_at: None,
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn find_by_path(&self, path: &Path) -> Result<Option<LibraryItemRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let mut open = self.gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
        Ok(self.items.lock().get(&*path.to_string_lossy()).cloned())
    }

    async fn insert(&self, item: CreateLibraryItem) -> Result<LibraryItemRecord> {
        let mut items = self.items.lock();
        if items.contains_key(&item.path) {
            bail!("UNIQUE constraint failed: library_items.path");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let mut created = record(id, &item.path, item.needs_processing);
        created.category = item.category;
        created.size_bytes = item.size_bytes;
        created.width = item.width;
        created.height = item.height;
        items.insert(item.path, created.clone());
        Ok(created)
    }

    async fn count_needing_processing(&self) -> Result<i64> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|r| r.needs_processing)
            .count() as i64)
    }

    async fn next_needing_processing(&self) -> Result<Option<LibraryItemRecord>> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|r| r.needs_processing)
            .min_by_key(|r| r.id)
            .cloned())
    }

    async fn mark_processed(&self, id: i64, update: ProcessedUpdate) -> Result<()> {
        let mut items = self.items.lock();
        if let Some(r) = items.values_mut().find(|r| r.id == id) {
            r.needs_processing = false;
            r.processing_error = update.error;
            r.mime_type = update.mime_type.or(r.mime_type.take());
            r.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Importer recording every call and the peak number of concurrent imports
pub struct RecordingImporter {
    store: Option<Arc<MemoryStore>>,
    delay: Duration,
    fail_on: HashSet<String>,
    panic_on: HashSet<String>,
    current: AtomicUsize,
    pub max_seen: AtomicUsize,
    pub imported: Mutex<Vec<PathBuf>>,
    pub contexts: Mutex<Vec<ImportContext>>,
}

impl RecordingImporter {
    pub fn new() -> Self {
        Self {
            store: None,
            delay: Duration::ZERO,
            fail_on: HashSet::new(),
            panic_on: HashSet::new(),
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            imported: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Also insert every imported path into the store
    pub fn writing_to(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.fail_on.insert(file_name.to_string());
        self
    }

    pub fn panicking_on(mut self, file_name: &str) -> Self {
        self.panic_on.insert(file_name.to_string());
        self
    }

    pub fn imported(&self) -> Vec<PathBuf> {
        self.imported.lock().clone()
    }
}

#[async_trait]
impl MediaImporter for RecordingImporter {
    async fn import(&self, item: &DiscoveredPath, ctx: ImportContext) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.contexts.lock().push(ctx);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.contains(&name) {
            panic!("importer blew up on {name}");
        }
        if self.fail_on.contains(&name) {
            bail!("cannot import {name}");
        }

        if let Some(store) = &self.store {
            store
                .insert(CreateLibraryItem {
                    path: item.path.to_string_lossy().into_owned(),
                    category: item.category.as_str().to_string(),
                    size_bytes: 0,
                    width: None,
                    height: None,
                    needs_processing: false,
                })
                .await?;
        }
        self.imported.lock().push(item.path.clone());
        Ok(())
    }
}

/// Launcher returning a fixed exit status, optionally held until released
pub struct ScriptedLauncher {
    exit: io::Result<WorkerExit>,
    release: watch::Sender<bool>,
    pub launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn exiting_with(code: i32) -> Arc<Self> {
        Arc::new(Self {
            exit: Ok(WorkerExit {
                code: Some(code),
                signal: None,
            }),
            release: watch::Sender::new(true),
            launches: AtomicUsize::new(0),
        })
    }

    pub fn failing_to_spawn() -> Arc<Self> {
        Arc::new(Self {
            exit: Err(io::Error::new(io::ErrorKind::NotFound, "no such binary")),
            release: watch::Sender::new(true),
            launches: AtomicUsize::new(0),
        })
    }

    /// A launcher whose worker keeps running until `release` is called
    pub fn blocking(code: i32) -> Arc<Self> {
        let launcher = Self::exiting_with(code);
        launcher.release.send_replace(false);
        launcher
    }

    pub fn release(&self) {
        self.release.send_replace(true);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self) -> io::Result<WorkerExit> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut released = self.release.subscribe();
        let _ = released.wait_for(|r| *r).await;
        match &self.exit {
            Ok(exit) => Ok(*exit),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        }
    }
}
