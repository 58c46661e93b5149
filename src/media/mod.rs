//! Media categories and the file-type knowledge shared by the pipeline
//!
//! Centralizes the supported extensions per category so that the filter, the
//! folder walker and the watcher glob builder agree on what counts as media.

pub mod filter;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use filter::{FilterError, PathFilter};

/// Video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm"];

/// Image file extensions (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Basename prefixes that mark a file as hidden or as an original replaced by a transcode
pub const IGNORED_NAME_PREFIXES: &[&str] = &[".", "$_"];

/// The two media kinds, each with its own independent import pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Video,
    Image,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Video, Category::Image];

    /// Supported extensions, lowercase with the leading dot
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Category::Video => VIDEO_EXTENSIONS,
            Category::Image => IMAGE_EXTENSIONS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Video => "video",
            Category::Image => "image",
        }
    }

    /// Check whether the path carries one of this category's extensions
    pub fn matches_extension(self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.extensions()
            .iter()
            .any(|supported| supported.trim_start_matches('.') == ext)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path handed to a category queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPath {
    pub path: PathBuf,
    pub category: Category,
}

impl DiscoveredPath {
    pub fn new(path: impl Into<PathBuf>, category: Category) -> Self {
        Self {
            path: path.into(),
            category,
        }
    }
}

/// Check if the basename starts with a hidden or replaced-original marker
pub fn has_ignored_prefix(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| IGNORED_NAME_PREFIXES.iter().any(|p| name.starts_with(p)))
}
