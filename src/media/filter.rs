//! Importability predicate shared by the queues, the walker and the watcher

use std::path::Path;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use thiserror::Error;

use super::{Category, has_ignored_prefix};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid exclusion pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Decides whether a path should enter a category pipeline.
///
/// A path is importable when its extension belongs to the category, its
/// basename does not start with a hidden or replaced-original marker, and it
/// is not matched by any exclusion glob. Exclusions match case-insensitively
/// against the full path.
#[derive(Debug, Clone)]
pub struct PathFilter {
    exclusions: GlobSet,
    patterns: Vec<String>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(exclusions: &[S]) -> Result<Self, FilterError> {
        Ok(Self {
            exclusions: build_exclusion_set(exclusions)?,
            patterns: exclusions.iter().map(|p| p.as_ref().to_string()).collect(),
        })
    }

    /// A filter without exclusions
    pub fn permissive() -> Self {
        Self {
            exclusions: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn is_importable(&self, path: &Path, category: Category) -> bool {
        category.matches_extension(path) && !has_ignored_prefix(path) && !self.is_excluded(path)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        !self.exclusions.is_empty() && self.exclusions.is_match(path)
    }

    /// The exclusion patterns as configured
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Compile exclusion patterns into one case-insensitive glob set
pub fn build_exclusion_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, FilterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern.as_ref())?);
    }
    builder.build().map_err(|source| FilterError::InvalidPattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(","),
        source,
    })
}

fn compile(pattern: &str) -> Result<Glob, FilterError> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(false)
        .build()
        .map_err(|source| FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}
