//! Database connection and the library store seam

pub mod library_items;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use library_items::{
    CreateLibraryItem, LibraryItemRecord, LibraryItemRepository, ProcessedUpdate,
};

/// The library store as seen by the import pipeline.
///
/// The store is the source of truth for "does this path already exist":
/// queues consult it before enqueuing, the importer writes to it, and the
/// processing worker drains its "needs processing" entries.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn find_by_path(&self, path: &Path) -> Result<Option<LibraryItemRecord>>;

    async fn insert(&self, item: CreateLibraryItem) -> Result<LibraryItemRecord>;

    /// Number of entries the processing worker still has to handle
    async fn count_needing_processing(&self) -> Result<i64>;

    async fn next_needing_processing(&self) -> Result<Option<LibraryItemRecord>>;

    async fn mark_processed(&self, id: i64, update: ProcessedUpdate) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS library_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT,
    width INTEGER,
    height INTEGER,
    needs_processing INTEGER NOT NULL DEFAULT 0,
    processing_error TEXT,
    imported_at TEXT NOT NULL,
    processed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_library_items_needs_processing
    ON library_items (needs_processing);
"#;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new database connection pool and make sure the schema exists
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{url}'"))?
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Private in-memory database. A single connection that never expires,
    /// otherwise every new connection would see an empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
    ) -> Self {
        loop {
            match Self::connect(url, max_connections).await {
                Ok(db) => return db,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a library items repository
    pub fn library_items(&self) -> LibraryItemRepository {
        LibraryItemRepository::new(self.pool.clone())
    }
}

#[async_trait]
impl MediaStore for Database {
    async fn find_by_path(&self, path: &Path) -> Result<Option<LibraryItemRecord>> {
        self.library_items()
            .get_by_path(&path.to_string_lossy())
            .await
    }

    async fn insert(&self, item: CreateLibraryItem) -> Result<LibraryItemRecord> {
        self.library_items().create(item).await
    }

    async fn count_needing_processing(&self) -> Result<i64> {
        self.library_items().count_needing_processing().await
    }

    async fn next_needing_processing(&self) -> Result<Option<LibraryItemRecord>> {
        self.library_items().next_needing_processing().await
    }

    async fn mark_processed(&self, id: i64, update: ProcessedUpdate) -> Result<()> {
        self.library_items().mark_processed(id, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn video(path: &str) -> CreateLibraryItem {
        CreateLibraryItem {
            path: path.to_string(),
            category: "video".to_string(),
            size_bytes: 42,
            width: None,
            height: None,
            needs_processing: true,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_by_path() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(db.find_by_path(Path::new("/lib/a.mp4")).await.unwrap().is_none());

        let created = db.insert(video("/lib/a.mp4")).await.unwrap();
        let found = db
            .find_by_path(Path::new("/lib/a.mp4"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.category, "video");
        assert!(found.needs_processing);
    }

    #[tokio::test]
    async fn test_duplicate_path_is_rejected() {
        let db = Database::connect_in_memory().await.unwrap();
        db.insert(video("/lib/a.mp4")).await.unwrap();
        assert!(db.insert(video("/lib/a.mp4")).await.is_err());
    }

    #[tokio::test]
    async fn test_processing_lifecycle() {
        let db = Database::connect_in_memory().await.unwrap();
        db.insert(video("/lib/a.mp4")).await.unwrap();
        db.insert(video("/lib/b.mp4")).await.unwrap();
        assert_eq!(db.count_needing_processing().await.unwrap(), 2);

        let next = db.next_needing_processing().await.unwrap().unwrap();
        assert_eq!(next.path, "/lib/a.mp4");
        db.mark_processed(
            next.id,
            ProcessedUpdate {
                mime_type: Some("video/mp4".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(db.count_needing_processing().await.unwrap(), 1);
        let processed = db
            .find_by_path(Path::new("/lib/a.mp4"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed.mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(processed.size_bytes, 42);
        assert!(processed.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.db");
        let url = format!("sqlite:{}", path.display());

        let db = Database::connect(&url, 2).await.unwrap();
        db.insert(video("/lib/a.mp4")).await.unwrap();
        assert!(path.exists());
    }
}
