//! Discovery, import and processing services

pub mod import_manager;
pub mod import_queue;
pub mod importer;
pub mod library_watcher;
pub mod logging;
pub mod orchestrator;
pub mod processing;
pub mod scanner;
pub mod watcher;
pub mod worker;

pub use import_manager::{CategoryImportStatus, ImportManager};
pub use import_queue::{AddOutcome, CategoryImportQueue, ImageReadPolicy};
pub use importer::{ImportContext, MediaImporter, StoreImporter};
pub use library_watcher::{LibraryWatcher, create_watch_paths};
pub use orchestrator::{ImportStatus, ScanOrchestrator, ScanState};
pub use processing::{
    ProcessWorkerLauncher, ProcessingError, ProcessingRun, ProcessingSupervisor, WorkerExit,
    WorkerLauncher,
};
pub use watcher::{ChangeWatcher, WatcherOptions};
pub use worker::{FileProbe, ItemProcessor, WorkerSummary, run_processing_worker};
