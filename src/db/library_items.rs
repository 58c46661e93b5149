//! Library items database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Library item record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LibraryItemRecord {
    pub id: i64,
    pub path: String,
    pub category: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub needs_processing: bool,
    pub processing_error: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Input for creating a library item
#[derive(Debug, Clone)]
pub struct CreateLibraryItem {
    pub path: String,
    pub category: String,
    pub size_bytes: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub needs_processing: bool,
}

/// Outcome of processing one item in the worker
#[derive(Debug, Clone, Default)]
pub struct ProcessedUpdate {
    pub size_bytes: Option<i64>,
    pub mime_type: Option<String>,
    pub error: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, path, category, size_bytes, mime_type, width, height, \
     needs_processing, processing_error, imported_at, processed_at FROM library_items";

pub struct LibraryItemRepository {
    pool: SqlitePool,
}

impl LibraryItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a library item by path
    pub async fn get_by_path(&self, path: &str) -> Result<Option<LibraryItemRecord>> {
        let record =
            sqlx::query_as::<_, LibraryItemRecord>(&format!("{SELECT_COLUMNS} WHERE path = ?"))
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// Create a new library item
    pub async fn create(&self, input: CreateLibraryItem) -> Result<LibraryItemRecord> {
        let record = sqlx::query_as::<_, LibraryItemRecord>(
            r#"
            INSERT INTO library_items (path, category, size_bytes, width, height, needs_processing, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, path, category, size_bytes, mime_type, width, height,
                      needs_processing, processing_error, imported_at, processed_at
            "#,
        )
        .bind(&input.path)
        .bind(&input.category)
        .bind(input.size_bytes)
        .bind(input.width)
        .bind(input.height)
        .bind(input.needs_processing)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn count_needing_processing(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM library_items WHERE needs_processing = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Oldest item still waiting for the processing worker
    pub async fn next_needing_processing(&self) -> Result<Option<LibraryItemRecord>> {
        let record = sqlx::query_as::<_, LibraryItemRecord>(&format!(
            "{SELECT_COLUMNS} WHERE needs_processing = 1 ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Clear the processing flag, recording what the worker found (or why it failed)
    pub async fn mark_processed(&self, id: i64, update: ProcessedUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE library_items
            SET needs_processing = 0,
                size_bytes = COALESCE(?, size_bytes),
                mime_type = COALESCE(?, mime_type),
                processing_error = ?,
                processed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.size_bytes)
        .bind(update.mime_type)
        .bind(update.error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
