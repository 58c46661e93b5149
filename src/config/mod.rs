//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL or path
    pub database_url: String,

    /// Maximum pooled database connections
    pub database_max_connections: u32,

    /// Roots searched for video files
    pub video_paths: Vec<PathBuf>,

    /// Roots searched for image files
    pub image_paths: Vec<PathBuf>,

    /// Glob patterns for paths that must never be imported
    pub exclude_files: Vec<String>,

    /// Watch the library continuously instead of running periodic manual scans
    pub watch_library: bool,

    /// Watcher polling interval; zero selects native change notifications
    pub watch_polling_interval: Duration,

    /// How long a new file's size must stay unchanged before it is reported
    pub watch_write_settle: Duration,

    /// Delay between the end of processing and the next manual scan, in
    /// milliseconds. Zero or negative disables scheduled rescans.
    pub scan_interval_ms: i64,

    /// Read image dimensions even before the initial watch scan completes
    pub read_images_on_import: bool,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./data/library.db".to_string(),
            database_max_connections: 10,
            video_paths: Vec::new(),
            image_paths: Vec::new(),
            exclude_files: Vec::new(),
            watch_library: false,
            watch_polling_interval: Duration::from_millis(2000),
            watch_write_settle: Duration::from_millis(2000),
            scan_interval_ms: 10_800_000,
            read_images_on_import: false,
            log_json: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Prefer DATABASE_PATH, fall back to DATABASE_URL
        let database_url = lookup("DATABASE_PATH")
            .or_else(|| lookup("DATABASE_URL"))
            .map(|v| {
                if v.starts_with("sqlite:") {
                    v
                } else {
                    format!("sqlite:{v}")
                }
            })
            .unwrap_or(defaults.database_url);

        Ok(Self {
            database_url,

            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,

            video_paths: split_list(lookup("VIDEO_PATHS"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),

            image_paths: split_list(lookup("IMAGE_PATHS"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),

            exclude_files: split_list(lookup("EXCLUDE_FILES")),

            watch_library: lookup("WATCH_LIBRARY")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.watch_library),

            watch_polling_interval: Duration::from_millis(parse_or(
                &lookup,
                "WATCH_POLLING_INTERVAL",
                2000u64,
            )?),

            watch_write_settle: Duration::from_millis(parse_or(
                &lookup,
                "WATCH_WRITE_SETTLE",
                2000u64,
            )?),

            scan_interval_ms: parse_or(&lookup, "SCAN_INTERVAL", defaults.scan_interval_ms)?,

            read_images_on_import: lookup("READ_IMAGES_ON_IMPORT")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.read_images_on_import),

            log_json: lookup("LOG_JSON")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.log_json),
        })
    }

    /// Rescan delay, or `None` when scheduled rescans are disabled
    pub fn scan_interval(&self) -> Option<Duration> {
        (self.scan_interval_ms > 0).then(|| Duration::from_millis(self.scan_interval_ms as u64))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}: '{v}'")),
        None => Ok(default),
    }
}

fn parse_bool(v: &str) -> bool {
    let v = v.trim().to_lowercase();
    v == "true" || v == "1"
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
