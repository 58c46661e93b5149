//! Librarian ingest - entry point
//!
//! Without flags this runs the importer: it watches or scans the library
//! until interrupted. With `--process-queue` it runs the processing worker
//! instead and exits once nothing is left to process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use librarian_ingest::cli::CliOptions;
use librarian_ingest::config::Config;
use librarian_ingest::db::Database;
use librarian_ingest::media::PathFilter;
use librarian_ingest::services::logging::init_tracing;
use librarian_ingest::services::{
    FileProbe, ImportManager, ProcessWorkerLauncher, ProcessingSupervisor, ScanOrchestrator,
    StoreImporter, run_processing_worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args();
    let config = Arc::new(Config::from_env()?);

    init_tracing(config.log_json);

    let db = Arc::new(
        Database::connect_with_retry(
            &config.database_url,
            config.database_max_connections,
            Duration::from_secs(5),
        )
        .await,
    );

    if options.process_queue {
        let summary = run_processing_worker(db.as_ref(), &FileProbe).await?;
        tracing::info!(processed = summary.processed, failed = summary.failed, "Worker exiting");
        return Ok(());
    }

    tracing::info!(
        videos = ?config.video_paths,
        images = ?config.image_paths,
        watch = config.watch_library,
        "Starting Librarian ingest"
    );

    let filter = Arc::new(PathFilter::new(&config.exclude_files)?);
    let importer = Arc::new(StoreImporter::new(db.clone()));
    let manager = Arc::new(ImportManager::new(
        filter.clone(),
        db.clone(),
        importer,
        config.read_images_on_import,
    ));
    let launcher = Arc::new(
        ProcessWorkerLauncher::from_current_process()
            .context("Could not determine how to launch the processing worker")?,
    );
    let processing = Arc::new(ProcessingSupervisor::new(db.clone(), launcher));
    let orchestrator = ScanOrchestrator::new(config.clone(), filter, manager, processing);

    tokio::spawn(orchestrator.scan_folders(options.force_manual_scan));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    orchestrator.destroy_importer().await;
    tracing::info!(
        status = %serde_json::to_string(&orchestrator.status())?,
        "Librarian ingest stopped"
    );

    Ok(())
}
